use chrono::{NaiveDateTime, Utc};
use crypto::digest::Digest;
use crypto::md5::Md5;
use crypto::pbkdf2::{pbkdf2_check, pbkdf2_simple};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, select};
use regex::Regex;
use std::collections::HashMap;

use db::schema::{followers, users_post, users_user};
use types::AppError;

/// Upper bound on post bodies and the free-text "about me" field.
pub const BODY_LEN: usize = 140;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_.]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Staff,
    Admin,
}

impl Role {
    pub fn from_code(code: i16) -> Role {
        match code {
            1 => Role::Staff,
            2 => Role::Admin,
            _ => Role::User,
        }
    }

    pub fn code(&self) -> i16 {
        match *self {
            Role::User => 0,
            Role::Staff => 1,
            Role::Admin => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match *self {
            Role::User => "user",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Active,
    Banned,
}

impl Status {
    pub fn from_code(code: i16) -> Status {
        match code {
            1 => Status::Active,
            2 => Status::Banned,
            _ => Status::New,
        }
    }

    pub fn code(&self) -> i16 {
        match *self {
            Status::New => 0,
            Status::Active => 1,
            Status::Banned => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match *self {
            Status::New => "new",
            Status::Active => "active",
            Status::Banned => "banned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, AsChangeset, Serialize)]
#[table_name = "users_user"]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: i16,
    pub status: i16,
    pub about_me: Option<String>,
    pub last_seen: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[table_name = "users_user"]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl User {
    pub fn make_password(password: &str) -> Result<String, AppError> {
        pbkdf2_simple(password, 1000).map_err(|e| e.into())
    }

    pub fn verify_password(&self, password_to_verify: &str) -> Result<bool, AppError> {
        pbkdf2_check(password_to_verify, &self.password).map_err(|_| AppError::Internal)
    }

    pub fn role(&self) -> Role {
        Role::from_code(self.role)
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.status)
    }

    /// Gravatar URL for the user's email.
    pub fn avatar(&self, size: u32) -> String {
        let mut digest = Md5::new();
        digest.input_str(&self.email.trim().to_lowercase());
        format!(
            "https://www.gravatar.com/avatar/{}?d=mm&s={}",
            digest.result_str(),
            size
        )
    }

    pub fn load_by_id(user_id: i32, connection: &PgConnection) -> QueryResult<Option<User>> {
        users_user::table.find(user_id).first(connection).optional()
    }

    pub fn load_by_name(name: &str, connection: &PgConnection) -> QueryResult<Option<User>> {
        users_user::table
            .filter(users_user::name.eq(name))
            .first(connection)
            .optional()
    }

    pub fn load_by_email(email: &str, connection: &PgConnection) -> QueryResult<Option<User>> {
        users_user::table
            .filter(users_user::email.eq(email))
            .first(connection)
            .optional()
    }

    pub fn name_taken(name: &str, connection: &PgConnection) -> QueryResult<bool> {
        select(exists(
            users_user::table.filter(users_user::name.eq(name)),
        )).get_result(connection)
    }

    pub fn email_taken(email: &str, connection: &PgConnection) -> QueryResult<bool> {
        select(exists(
            users_user::table.filter(users_user::email.eq(email)),
        )).get_result(connection)
    }

    /// Stamps the user as seen now. Called once per authenticated request.
    pub fn touch_last_seen(&mut self, connection: &PgConnection) -> QueryResult<()> {
        let now = Utc::now().naive_utc();
        self.last_seen = Some(now);
        diesel::update(users_user::table.find(self.id))
            .set(users_user::last_seen.eq(now))
            .execute(connection)?;
        Ok(())
    }

    pub fn is_following(&self, other: &User, connection: &PgConnection) -> QueryResult<bool> {
        select(exists(
            followers::table
                .filter(followers::follower_id.eq(self.id))
                .filter(followers::followed_id.eq(other.id)),
        )).get_result(connection)
    }

    /// Inserts the follow edge self -> other. Returns `None` when the edge was
    /// already present, leaving the store untouched. The composite primary key
    /// on the edge table keeps this race-free under concurrent requests.
    pub fn follow(&self, other: &User, connection: &PgConnection) -> QueryResult<Option<&User>> {
        let inserted = insert_into(followers::table)
            .values((
                followers::follower_id.eq(self.id),
                followers::followed_id.eq(other.id),
            ))
            .on_conflict((followers::follower_id, followers::followed_id))
            .do_nothing()
            .execute(connection)?;
        Ok(if inserted == 0 { None } else { Some(self) })
    }

    /// Removes the follow edge self -> other. Returns `None` when there was no
    /// edge to remove.
    pub fn unfollow(&self, other: &User, connection: &PgConnection) -> QueryResult<Option<&User>> {
        let removed = delete(
            followers::table
                .filter(followers::follower_id.eq(self.id))
                .filter(followers::followed_id.eq(other.id)),
        ).execute(connection)?;
        Ok(if removed == 0 { None } else { Some(self) })
    }

    /// All posts authored by users this user follows, newest first. The user's
    /// own posts are included exactly when the user follows themself.
    pub fn followed_posts(&self, connection: &PgConnection) -> QueryResult<Vec<Post>> {
        users_post::table
            .inner_join(
                followers::table.on(followers::followed_id.eq(users_post::user_id)),
            )
            .filter(followers::follower_id.eq(self.id))
            .order(users_post::timestamp.desc())
            .select(users_post::all_columns)
            .load(connection)
    }

    /// One page of the feed, with each post's author for rendering.
    pub fn followed_posts_page(
        &self,
        page: i64,
        per_page: i64,
        connection: &PgConnection,
    ) -> QueryResult<PostPage> {
        use diesel::dsl::any;

        let page = if page < 1 { 1 } else { page };
        let total = users_post::table
            .inner_join(
                followers::table.on(followers::followed_id.eq(users_post::user_id)),
            )
            .filter(followers::follower_id.eq(self.id))
            .count()
            .get_result(connection)?;
        let posts = users_post::table
            .inner_join(
                followers::table.on(followers::followed_id.eq(users_post::user_id)),
            )
            .filter(followers::follower_id.eq(self.id))
            .order(users_post::timestamp.desc())
            .limit(per_page)
            .offset((page - 1) * per_page)
            .select(users_post::all_columns)
            .load::<Post>(connection)?;
        let author_ids: Vec<i32> = posts.iter().map(|post| post.user_id).collect();
        let authors: HashMap<i32, User> = users_user::table
            .filter(users_user::id.eq(any(author_ids)))
            .load::<User>(connection)?
            .into_iter()
            .map(|author| (author.id, author))
            .collect();
        let items = posts
            .into_iter()
            .filter_map(|post| {
                let author = authors.get(&post.user_id).cloned();
                author.map(|author| (post, author))
            })
            .collect();
        Ok(PostPage {
            items,
            page,
            per_page,
            total,
        })
    }

    /// Maps arbitrary display-name input to the allowed character set:
    /// letters, digits, dots and underscores.
    pub fn make_valid_name(raw: &str) -> String {
        INVALID_NAME_CHARS.replace_all(raw, "").into_owned()
    }

    /// First free variant of `base`: `base` itself, then `base2`, `base3`, ...
    /// Advisory only; the UNIQUE constraint on the name column is what actually
    /// guarantees uniqueness (see `register`).
    pub fn make_unique_name(base: &str, connection: &PgConnection) -> QueryResult<String> {
        if !User::name_taken(base, connection)? {
            return Ok(base.to_string());
        }
        let mut version = 2;
        loop {
            let candidate = format!("{}{}", base, version);
            if !User::name_taken(&candidate, connection)? {
                return Ok(candidate);
            }
            version += 1;
        }
    }

    /// Creates a user with a normalized, unique display name, then makes the
    /// user follow themself so their own posts show up in their feed.
    ///
    /// The name check and the insert cannot be atomic from here, so the insert
    /// runs with ON CONFLICT DO NOTHING on the name column and picks a fresh
    /// candidate whenever a concurrent registration won the name.
    pub fn register(
        name: &str,
        email: &str,
        password: &str,
        connection: &PgConnection,
    ) -> Result<User, AppError> {
        let base = User::make_valid_name(name);
        let base = if base.is_empty() {
            "user".to_string()
        } else {
            base
        };
        let password = User::make_password(password)?;
        loop {
            let candidate = User::make_unique_name(&base, connection)?;
            let created = insert_into(users_user::table)
                .values(&NewUser {
                    name: candidate.clone(),
                    email: email.to_string(),
                    password: password.clone(),
                })
                .on_conflict(users_user::name)
                .do_nothing()
                .get_result::<User>(connection)
                .optional()?;
            match created {
                Some(user) => {
                    user.follow(&user, connection)?;
                    return Ok(user);
                }
                None => {
                    info!("display name {:?} was taken concurrently, retrying", candidate);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize)]
#[table_name = "users_post"]
pub struct Post {
    pub id: i32,
    pub body: String,
    pub timestamp: NaiveDateTime,
    pub user_id: i32,
}

#[derive(Debug, Insertable)]
#[table_name = "users_post"]
pub struct NewPost {
    pub body: String,
    pub timestamp: NaiveDateTime,
    pub user_id: i32,
}

impl Post {
    /// Stores a new post for `author`, stamped now. Posts are immutable once
    /// created.
    pub fn create(author: &User, body: &str, connection: &PgConnection) -> QueryResult<Post> {
        insert_into(users_post::table)
            .values(&NewPost {
                body: body.to_string(),
                timestamp: Utc::now().naive_utc(),
                user_id: author.id,
            })
            .get_result(connection)
    }
}

/// One page of a feed plus enough bookkeeping to render pagination links.
#[derive(Debug)]
pub struct PostPage {
    pub items: Vec<(Post, User)>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl PostPage {
    pub fn pages(&self) -> i64 {
        let pages = (self.total + self.per_page - 1) / self.per_page;
        if pages < 1 {
            1
        } else {
            pages
        }
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime, Utc};
    use diesel::insert_into;
    use diesel::prelude::*;
    use diesel::PgConnection;
    use dotenv::dotenv;
    use std::env;

    use db::schema::{followers, users_post, users_user};

    fn connection() -> PgConnection {
        dotenv().ok();
        let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set to run model tests");
        let connection = PgConnection::establish(&url).expect("failed to connect to test database");
        connection
            .begin_test_transaction()
            .expect("failed to begin test transaction");
        connection
    }

    fn insert_user(name: &str, email: &str, connection: &PgConnection) -> User {
        insert_into(users_user::table)
            .values(&NewUser {
                name: name.to_string(),
                email: email.to_string(),
                password: "x".to_string(),
            })
            .get_result(connection)
            .expect("failed to insert user")
    }

    fn insert_post(author: &User, body: &str, timestamp: NaiveDateTime, connection: &PgConnection) -> Post {
        insert_into(users_post::table)
            .values(&NewPost {
                body: body.to_string(),
                timestamp,
                user_id: author.id,
            })
            .get_result(connection)
            .expect("failed to insert post")
    }

    fn edge_count(user: &User, connection: &PgConnection) -> i64 {
        followers::table
            .filter(followers::follower_id.eq(user.id))
            .count()
            .get_result(connection)
            .unwrap()
    }

    #[test]
    fn valid_name_strips_disallowed_characters() {
        assert_eq!(User::make_valid_name("john"), "john");
        assert_eq!(User::make_valid_name("john.doe_99"), "john.doe_99");
        assert_eq!(User::make_valid_name("Tom O'Malley!"), "TomOMalley");
        assert_eq!(User::make_valid_name("<script>"), "script");
        assert_eq!(User::make_valid_name("日本語"), "");
    }

    #[test]
    fn role_and_status_round_trip_their_codes() {
        for role in &[Role::User, Role::Staff, Role::Admin] {
            assert_eq!(Role::from_code(role.code()), *role);
        }
        for status in &[Status::New, Status::Active, Status::Banned] {
            assert_eq!(Status::from_code(status.code()), *status);
        }
        assert_eq!(Role::from_code(99), Role::User);
        assert_eq!(Status::from_code(99), Status::New);
    }

    #[test]
    fn avatar_is_derived_from_the_email() {
        let connection = connection();
        let john = insert_user("john", "John@Example.com ", &connection);
        let url = john.avatar(128);
        assert!(url.starts_with("https://www.gravatar.com/avatar/"));
        assert!(url.ends_with("?d=mm&s=128"));
        // Same address in canonical form hashes identically.
        let twin = insert_user("john2", "john@example.com", &connection);
        assert_eq!(url, twin.avatar(128));
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = User::make_password("cat dog").unwrap();
        let connection = connection();
        let mut user = insert_user("susan", "susan@example.com", &connection);
        user.password = hash;
        assert_eq!(user.verify_password("cat dog").unwrap(), true);
        assert_eq!(user.verify_password("dog cat").unwrap(), false);
    }

    #[test]
    fn unique_name_is_identity_for_free_names() {
        let connection = connection();
        assert_eq!(User::make_unique_name("john", &connection).unwrap(), "john");
    }

    #[test]
    fn unique_name_suffixes_count_up_from_two() {
        let connection = connection();
        insert_user("john", "john@example.com", &connection);
        let name = User::make_unique_name("john", &connection).unwrap();
        assert_eq!(name, "john2");
        insert_user(&name, "john2@example.com", &connection);
        assert_eq!(User::make_unique_name("john", &connection).unwrap(), "john3");
    }

    #[test]
    fn follow_and_unfollow_toggle_a_single_edge() {
        let connection = connection();
        let mark = insert_user("mark", "mark@example.com", &connection);
        let rudy = insert_user("rudy", "rudy@example.com", &connection);

        assert_eq!(mark.is_following(&rudy, &connection).unwrap(), false);
        assert!(mark.unfollow(&rudy, &connection).unwrap().is_none());

        assert!(mark.follow(&rudy, &connection).unwrap().is_some());
        assert_eq!(mark.is_following(&rudy, &connection).unwrap(), true);
        // Second follow without an intervening unfollow reports no change.
        assert!(mark.follow(&rudy, &connection).unwrap().is_none());
        assert_eq!(edge_count(&mark, &connection), 1);

        assert!(mark.unfollow(&rudy, &connection).unwrap().is_some());
        assert!(mark.unfollow(&rudy, &connection).unwrap().is_none());
        assert_eq!(mark.is_following(&rudy, &connection).unwrap(), false);
        assert_eq!(edge_count(&mark, &connection), 0);
    }

    #[test]
    fn self_follow_is_allowed_at_the_model_level() {
        let connection = connection();
        let mark = insert_user("mark", "mark@example.com", &connection);
        assert!(mark.follow(&mark, &connection).unwrap().is_some());
        assert_eq!(mark.is_following(&mark, &connection).unwrap(), true);
    }

    #[test]
    fn followed_posts_cover_exactly_the_followed_authors() {
        let connection = connection();
        let mark = insert_user("mark", "mark@example.com", &connection);
        let rudy = insert_user("rudy", "rudy@example.com", &connection);
        let jack = insert_user("jack", "jack@example.com", &connection);
        let william = insert_user("william", "william@example.com", &connection);

        let now = Utc::now().naive_utc();
        let p1 = insert_post(&mark, "post from mark", now + Duration::seconds(1), &connection);
        let p2 = insert_post(&rudy, "post from rudy", now + Duration::seconds(2), &connection);
        let p3 = insert_post(&jack, "post from jack", now + Duration::seconds(3), &connection);
        let p4 = insert_post(&william, "post from william", now + Duration::seconds(4), &connection);

        mark.follow(&rudy, &connection).unwrap();
        rudy.follow(&jack, &connection).unwrap();
        rudy.follow(&william, &connection).unwrap();
        jack.follow(&mark, &connection).unwrap();
        jack.follow(&jack, &connection).unwrap();
        william.follow(&mark, &connection).unwrap();
        william.follow(&jack, &connection).unwrap();
        william.follow(&william, &connection).unwrap();

        let f1 = mark.followed_posts(&connection).unwrap();
        let f2 = rudy.followed_posts(&connection).unwrap();
        let f3 = jack.followed_posts(&connection).unwrap();
        let f4 = william.followed_posts(&connection).unwrap();

        assert_eq!(f1, vec![p2]);
        assert_eq!(f2, vec![p4, p3]);
        assert_eq!(f3, vec![p3, p1]);
        assert_eq!(f4, vec![p4, p3, p1]);
    }

    #[test]
    fn feed_pages_carry_authors_and_bounds() {
        let connection = connection();
        let mark = insert_user("mark", "mark@example.com", &connection);
        let rudy = insert_user("rudy", "rudy@example.com", &connection);
        mark.follow(&rudy, &connection).unwrap();

        let now = Utc::now().naive_utc();
        for i in 0..5 {
            insert_post(&rudy, &format!("post {}", i), now + Duration::seconds(i), &connection);
        }

        let page = mark.followed_posts_page(1, 2, &connection).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.pages(), 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].0.body, "post 4");
        assert_eq!(page.items[0].1.name, "rudy");
        assert!(!page.has_prev());
        assert!(page.has_next());

        let last = mark.followed_posts_page(3, 2, &connection).unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.has_prev());
        assert!(!last.has_next());
    }

    #[test]
    fn registration_allocates_a_free_suffixed_name() {
        let connection = connection();
        insert_user("john", "john@example.com", &connection);
        let user = User::register("john!", "new@example.com", "cat dog", &connection).unwrap();
        assert_eq!(user.name, "john2");
        assert_eq!(user.role(), Role::User);
        assert_eq!(user.status(), Status::New);
        // Registration makes the user follow themself.
        assert_eq!(user.is_following(&user, &connection).unwrap(), true);
        assert_eq!(user.verify_password("cat dog").unwrap(), true);
    }
}
