diesel::table! {
    products (id) {
        id -> Uuid,
        title -> Varchar,
        description -> Text,
        price -> Numeric,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stocks (product_id) {
        product_id -> Uuid,
        count -> Int4,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(stocks -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    products,
    stocks,
);
