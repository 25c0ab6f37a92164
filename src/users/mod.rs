use diesel::prelude::*;
use diesel::PgConnection;
use rocket::http::{Cookie, Cookies, Status};
use rocket::request::{self, FlashMessage, Form, FromRequest};
use rocket::response::{Flash, Redirect};
use rocket::{Outcome, Request};
use rocket_contrib::{Template, Value};

use config;
use db::DbConnection;
use emails;
use search::search_posts;
use types::{Page, PageResult, Validate, ValidationError};

pub mod forms;
pub mod models;

use self::models::User;

const SESSION_COOKIE: &str = "user_id";

/// The logged-in user, pulled from the signed session cookie before the
/// request handler runs. Loading the user also refreshes `last_seen`.
pub struct CurrentUser(pub User);

impl ::std::ops::Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

impl<'a, 'r> FromRequest<'a, 'r> for CurrentUser {
    type Error = ();

    fn from_request(request: &'a Request<'r>) -> request::Outcome<CurrentUser, ()> {
        let user_id = match request.cookies().get_private(SESSION_COOKIE) {
            Some(ref cookie) => match cookie.value().parse::<i32>() {
                Ok(user_id) => user_id,
                Err(_) => return Outcome::Failure((Status::Unauthorized, ())),
            },
            None => return Outcome::Failure((Status::Unauthorized, ())),
        };
        let connection = match DbConnection::from_request(request) {
            Outcome::Success(connection) => connection,
            _ => return Outcome::Failure((Status::ServiceUnavailable, ())),
        };
        match User::load_by_id(user_id, &connection) {
            Ok(Some(mut user)) => {
                if let Err(e) = user.touch_last_seen(&connection) {
                    warn!("failed to refresh last_seen for {}: {}", user.name, e);
                }
                Outcome::Success(CurrentUser(user))
            }
            Ok(None) => Outcome::Failure((Status::Unauthorized, ())),
            Err(_) => Outcome::Failure((Status::ServiceUnavailable, ())),
        }
    }
}

fn user_url(name: &str) -> String {
    format!("/users/{}", name)
}

// Rocket decodes `String` path params on the way in, but outgoing Location
// headers have to be valid URIs.
fn percent_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'-' | b'.' | b'_' | b'~' => encoded.push(byte as char),
            _ if (byte as char).is_ascii_alphanumeric() => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn flash_json(flash: Option<FlashMessage>) -> Value {
    match flash {
        Some(ref flash) => json!({ "name": flash.name(), "msg": flash.msg() }),
        None => Value::Null,
    }
}

fn render_profile(
    current: &CurrentUser,
    connection: &PgConnection,
    name: &str,
    page: i64,
    flash: Option<FlashMessage>,
    form_body: &str,
    errors: &ValidationError,
) -> PageResult {
    let user = match User::load_by_name(name, connection)? {
        Some(user) => user,
        None => {
            return Ok(Flash::error(
                Redirect::to(&user_url(&current.name)),
                format!("User {} not found.", name),
            ).into())
        }
    };
    let feed = user.followed_posts_page(page, config::posts_per_page(), connection)?;
    let posts: Vec<Value> = feed.items
        .iter()
        .map(|&(ref post, ref author)| {
            json!({
                "body": &post.body,
                "timestamp": post.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                "author_name": &author.name,
                "author_avatar": author.avatar(48),
            })
        })
        .collect();
    let context = json!({
        "current_name": &current.name,
        "user": {
            "name": &user.name,
            "about_me": &user.about_me,
            "last_seen": user.last_seen.map(|seen| seen.format("%Y-%m-%d %H:%M").to_string()),
            "avatar": user.avatar(128),
        },
        "posts": posts,
        "page": feed.page,
        "pages": feed.pages(),
        "has_prev": feed.has_prev(),
        "has_next": feed.has_next(),
        "prev_page": feed.page - 1,
        "next_page": feed.page + 1,
        "form": { "body": form_body },
        "errors": errors.messages(),
        "flash": flash_json(flash),
    });
    Ok(Template::render("users/profile", &context).into())
}

/// Profile page: the named user plus a page of their feed.
#[get("/<name>")]
pub fn home(
    current: CurrentUser,
    connection: DbConnection,
    name: String,
    flash: Option<FlashMessage>,
) -> PageResult {
    render_profile(
        &current,
        &connection,
        &name,
        1,
        flash,
        "",
        &ValidationError::default(),
    )
}

#[get("/<name>/<page>")]
pub fn home_page(
    current: CurrentUser,
    connection: DbConnection,
    name: String,
    page: i64,
    flash: Option<FlashMessage>,
) -> PageResult {
    render_profile(
        &current,
        &connection,
        &name,
        page,
        flash,
        "",
        &ValidationError::default(),
    )
}

/// New post submission from the profile page. The post is always authored by
/// the logged-in user, whichever profile it was submitted from.
#[post("/<name>", data = "<form>")]
pub fn post_message(
    current: CurrentUser,
    connection: DbConnection,
    name: String,
    form: Form<forms::PostForm>,
) -> PageResult {
    let form = form.into_inner();
    let errors = form.validate(&connection)?;
    if !errors.empty() {
        return render_profile(&current, &connection, &name, 1, None, &form.body, &errors);
    }
    models::Post::create(&current, form.body.trim(), &connection)?;
    Ok(Flash::success(Redirect::to(&user_url(&name)), "Your post is live now!").into())
}

#[get("/login")]
pub fn login_page(current: Option<CurrentUser>, flash: Option<FlashMessage>) -> Page {
    if let Some(ref current) = current {
        return Redirect::to(&user_url(&current.name)).into();
    }
    Template::render(
        "users/login",
        &json!({
            "current_name": Value::Null,
            "form": { "email": "" },
            "errors": [],
            "flash": flash_json(flash),
        }),
    ).into()
}

#[post("/login", data = "<form>")]
pub fn login(
    connection: DbConnection,
    mut cookies: Cookies,
    form: Form<forms::LoginForm>,
) -> PageResult {
    let form = form.into_inner();
    let errors = form.validate(&connection)?;
    if !errors.empty() {
        return Ok(Template::render(
            "users/login",
            &json!({
                "current_name": Value::Null,
                "form": { "email": &form.email },
                "errors": errors.messages(),
                "flash": Value::Null,
            }),
        ).into());
    }
    let user = User::load_by_email(form.email.trim(), &connection)?;
    let authenticated = match user {
        Some(ref user) => user.verify_password(&form.password)?,
        None => false,
    };
    match user {
        Some(user) if authenticated => {
            cookies.add_private(Cookie::new(SESSION_COOKIE, user.id.to_string()));
            Ok(Flash::success(
                Redirect::to(&user_url(&user.name)),
                format!("Welcome {}", user.name),
            ).into())
        }
        // One message for both unknown email and bad password.
        _ => Ok(Flash::error(Redirect::to("/users/login"), "Wrong email or password").into()),
    }
}

#[get("/register")]
pub fn register_page(current: Option<CurrentUser>, flash: Option<FlashMessage>) -> Page {
    if let Some(ref current) = current {
        return Redirect::to(&user_url(&current.name)).into();
    }
    Template::render(
        "users/register",
        &json!({
            "current_name": Value::Null,
            "form": { "name": "", "email": "" },
            "errors": [],
            "flash": flash_json(flash),
        }),
    ).into()
}

#[post("/register", data = "<form>")]
pub fn register(
    connection: DbConnection,
    mut cookies: Cookies,
    form: Form<forms::RegisterForm>,
) -> PageResult {
    let form = form.into_inner();
    let errors = form.validate(&connection)?;
    if !errors.empty() {
        return Ok(Template::render(
            "users/register",
            &json!({
                "current_name": Value::Null,
                "form": { "name": &form.name, "email": &form.email },
                "errors": errors.messages(),
                "flash": Value::Null,
            }),
        ).into());
    }
    let user = User::register(form.name.trim(), form.email.trim(), &form.password, &connection)?;
    cookies.add_private(Cookie::new(SESSION_COOKIE, user.id.to_string()));
    Ok(Flash::success(
        Redirect::to(&user_url(&user.name)),
        "Thanks for registering",
    ).into())
}

#[get("/logout")]
pub fn logout(mut cookies: Cookies) -> Redirect {
    cookies.remove_private(Cookie::named(SESSION_COOKIE));
    Redirect::to("/users/login")
}

#[get("/edit")]
pub fn edit_page(current: CurrentUser, flash: Option<FlashMessage>) -> Page {
    Template::render(
        "users/edit",
        &json!({
            "current_name": &current.name,
            "form": {
                "name": &current.name,
                "about_me": current.about_me.as_ref().map(String::as_str).unwrap_or(""),
            },
            "errors": [],
            "flash": flash_json(flash),
        }),
    ).into()
}

#[post("/edit", data = "<form>")]
pub fn edit(
    current: CurrentUser,
    connection: DbConnection,
    form: Form<forms::EditForm>,
) -> PageResult {
    let form = form.into_inner();
    let errors = form.validate(&current, &connection)?;
    if !errors.empty() {
        return Ok(Template::render(
            "users/edit",
            &json!({
                "current_name": &current.name,
                "form": { "name": &form.name, "about_me": &form.about_me },
                "errors": errors.messages(),
                "flash": Value::Null,
            }),
        ).into());
    }
    let mut user = current.0;
    user.name = form.name.trim().to_string();
    user.about_me = Some(form.about_me.trim().to_string());
    diesel::update(&user).set(&user).execute(&*connection)?;
    Ok(Flash::success(
        Redirect::to(&user_url(&user.name)),
        "Your changes have been saved.",
    ).into())
}

#[post("/search", data = "<form>")]
pub fn search(
    current: CurrentUser,
    connection: DbConnection,
    form: Form<forms::SearchForm>,
) -> PageResult {
    let form = form.into_inner();
    let errors = form.validate(&connection)?;
    if !errors.empty() {
        return Ok(Redirect::to(&user_url(&current.name)).into());
    }
    Ok(Redirect::to(&format!(
        "/users/search_results/{}",
        percent_encode(form.query.trim())
    )).into())
}

#[get("/search_results/<query>")]
pub fn search_results(
    current: CurrentUser,
    connection: DbConnection,
    query: String,
    flash: Option<FlashMessage>,
) -> PageResult {
    let matches = search_posts(&query, config::max_search_results(), &connection)?;
    let results: Vec<Value> = matches
        .iter()
        .map(|&(ref post, ref author)| {
            json!({
                "body": &post.body,
                "timestamp": post.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                "author_name": &author.name,
                "author_avatar": author.avatar(48),
            })
        })
        .collect();
    let context = json!({
        "current_name": &current.name,
        "query": &query,
        "results": results,
        "flash": flash_json(flash),
    });
    Ok(Template::render("users/search_results", &context).into())
}

#[get("/follow/<name>")]
pub fn follow(current: CurrentUser, connection: DbConnection, name: String) -> PageResult {
    let own_page = user_url(&current.name);
    let user = match User::load_by_name(&name, &connection)? {
        Some(user) => user,
        None => {
            return Ok(Flash::error(
                Redirect::to(&own_page),
                format!("User {} not found.", name),
            ).into())
        }
    };
    if user.id == current.id {
        return Ok(Flash::error(Redirect::to(&own_page), "You can't follow yourself.").into());
    }
    let their_page = user_url(&user.name);
    if current.follow(&user, &connection)?.is_none() {
        return Ok(Flash::error(
            Redirect::to(&their_page),
            format!("Cannot follow {}.", name),
        ).into());
    }
    emails::follower_notification(&user, &current);
    Ok(Flash::success(
        Redirect::to(&their_page),
        format!("You are now following {}.", name),
    ).into())
}

#[get("/unfollow/<name>")]
pub fn unfollow(current: CurrentUser, connection: DbConnection, name: String) -> PageResult {
    let own_page = user_url(&current.name);
    let user = match User::load_by_name(&name, &connection)? {
        Some(user) => user,
        None => {
            return Ok(Flash::error(
                Redirect::to(&own_page),
                format!("User {} not found.", name),
            ).into())
        }
    };
    if user.id == current.id {
        return Ok(Flash::error(Redirect::to(&own_page), "You can't unfollow yourself.").into());
    }
    let their_page = user_url(&user.name);
    if current.unfollow(&user, &connection)?.is_none() {
        return Ok(Flash::error(
            Redirect::to(&their_page),
            format!("Cannot unfollow {}.", name),
        ).into());
    }
    Ok(Flash::success(
        Redirect::to(&their_page),
        format!("You have stopped following {}.", name),
    ).into())
}
