table! {
    followers (follower_id, followed_id) {
        follower_id -> Int4,
        followed_id -> Int4,
    }
}

table! {
    users_post (id) {
        id -> Int4,
        body -> Varchar,
        timestamp -> Timestamp,
        user_id -> Int4,
    }
}

table! {
    users_user (id) {
        id -> Int4,
        name -> Varchar,
        email -> Varchar,
        password -> Varchar,
        role -> Int2,
        status -> Int2,
        about_me -> Nullable<Varchar>,
        last_seen -> Nullable<Timestamp>,
    }
}

joinable!(users_post -> users_user (user_id));
allow_tables_to_appear_in_same_query!(followers, users_post, users_user);
