#![feature(plugin)]
#![feature(custom_derive)]
#![plugin(rocket_codegen)]

extern crate dotenv;
extern crate rocket;

#[macro_use]
extern crate error_chain;

#[macro_use]
extern crate diesel;
extern crate r2d2;
extern crate r2d2_diesel;

extern crate chrono;
extern crate crypto;
extern crate env_logger;
#[macro_use]
extern crate lazy_static;
extern crate lettre;
extern crate lettre_email;
#[macro_use]
extern crate log;
extern crate regex;
#[macro_use]
extern crate rocket_contrib;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;

mod config;
mod db;
mod emails;
mod search;
mod types;
mod users;

use rocket::request::Request;
use rocket::response::Redirect;
use rocket_contrib::Template;
use users::CurrentUser;

#[get("/")]
fn index(current: Option<CurrentUser>) -> Redirect {
    match current {
        Some(current) => Redirect::to(&format!("/users/{}", current.name)),
        None => Redirect::to("/users/login"),
    }
}

#[error(401)]
fn unauthorized(_req: &Request) -> Redirect {
    Redirect::to("/users/login")
}

#[error(404)]
fn not_found(_req: &Request) -> Template {
    Template::render("404", &json!({ "current_name": null, "flash": null }))
}

fn main() {
    env_logger::init();
    let pool = db::init_pool().expect("Failed to create database pool");
    rocket::ignite()
        .manage(pool)
        .mount("/", routes!(index))
        .mount(
            "/users",
            routes!(
                users::home,
                users::home_page,
                users::post_message,
                users::login_page,
                users::login,
                users::register_page,
                users::register,
                users::logout,
                users::edit_page,
                users::edit,
                users::search,
                users::search_results,
                users::follow,
                users::unfollow,
            ),
        )
        .catch(errors![unauthorized, not_found])
        .launch();
}
