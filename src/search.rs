use diesel::prelude::*;
use diesel::PgConnection;

use db::schema::{users_post, users_user};
use users::models::{Post, User};

/// Posts whose body matches `query`, newest first, with their authors. The
/// match is case-insensitive containment; ranking beyond recency is up to the
/// store.
pub fn search_posts(
    query: &str,
    limit: i64,
    connection: &PgConnection,
) -> QueryResult<Vec<(Post, User)>> {
    let pattern = format!("%{}%", escape_like(query));
    users_post::table
        .inner_join(users_user::table)
        .filter(users_post::body.ilike(pattern))
        .order(users_post::timestamp.desc())
        .limit(limit)
        .select((users_post::all_columns, users_user::all_columns))
        .load(connection)
}

// LIKE wildcards in user input must match literally.
fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use diesel::insert_into;
    use dotenv::dotenv;
    use std::env;

    use db::schema::users_user;
    use users::models::{NewPost, NewUser, User};

    fn connection() -> PgConnection {
        dotenv().ok();
        let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set to run search tests");
        let connection = PgConnection::establish(&url).expect("failed to connect to test database");
        connection
            .begin_test_transaction()
            .expect("failed to begin test transaction");
        connection
    }

    fn seed_posts(connection: &PgConnection) -> User {
        let user: User = insert_into(users_user::table)
            .values(&NewUser {
                name: "mark".to_string(),
                email: "mark@example.com".to_string(),
                password: "x".to_string(),
            })
            .get_result(connection)
            .unwrap();
        let now = Utc::now().naive_utc();
        for (i, body) in ["the quick brown fox", "lazy dogs everywhere", "Quick thinking"]
            .iter()
            .enumerate()
        {
            insert_into(users_post::table)
                .values(&NewPost {
                    body: body.to_string(),
                    timestamp: now + Duration::seconds(i as i64),
                    user_id: user.id,
                })
                .execute(connection)
                .unwrap();
        }
        user
    }

    #[test]
    fn search_is_case_insensitive_and_newest_first() {
        let connection = connection();
        seed_posts(&connection);
        let results = search_posts("quick", 10, &connection).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.body, "Quick thinking");
        assert_eq!(results[1].0.body, "the quick brown fox");
        assert_eq!(results[0].1.name, "mark");
    }

    #[test]
    fn search_honors_the_result_cap() {
        let connection = connection();
        seed_posts(&connection);
        let results = search_posts("e", 1, &connection).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn like_wildcards_match_literally() {
        let connection = connection();
        seed_posts(&connection);
        assert!(search_posts("%", 10, &connection).unwrap().is_empty());
        assert!(search_posts("qu_ck", 10, &connection).unwrap().is_empty());
    }
}
