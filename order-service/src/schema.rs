diesel::table! {
    product_lots (id) {
        id -> Uuid,
        seller_id -> Uuid,
        name -> Varchar,
        unit -> Varchar,
        price_per_unit -> Numeric,
        quantity_available -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        buyer_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        total_price -> Numeric,
        status -> Varchar,
        pickup_code -> Nullable<Varchar>,
        reservation_expiry -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    transactions (id) {
        id -> Uuid,
        order_id -> Uuid,
        seller_id -> Uuid,
        amount -> Numeric,
        status -> Varchar,
        available_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(orders -> product_lots (product_id));
diesel::joinable!(transactions -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(product_lots, orders, transactions);
