use diesel::result::Error as DieselError;
use diesel::PgConnection;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Flash, Redirect, Responder};
use rocket_contrib::Template;
use std::collections::HashMap;
use std::io::Error as IoError;

/// Server-side validation of a submitted form. Checks that need the store
/// (uniqueness lookups) run against the passed connection; a store failure is
/// an `AppError`, everything else lands in the returned error map.
pub trait Validate {
    fn validate(&self, connection: &PgConnection) -> Result<ValidationError, AppError>;
}

#[derive(Debug)]
pub enum AppError {
    Diesel(DieselError),
    Internal,
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> AppError {
        AppError::Diesel(err)
    }
}

impl From<IoError> for AppError {
    fn from(_: IoError) -> AppError {
        AppError::Internal
    }
}

/// Unhandled store failures surface as the framework's error page.
impl<'r> Responder<'r> for AppError {
    fn respond_to(self, _req: &Request) -> response::Result<'r> {
        match self {
            AppError::Diesel(DieselError::NotFound) => Err(Status::NotFound),
            _ => Err(Status::InternalServerError),
        }
    }
}

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Serialize, Default)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_insert_with(Vec::new);
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_insert_with(Vec::new);
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_error(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Flattens the map into (field, message) pairs for template rendering.
    pub fn messages(&self) -> Vec<FieldMessage> {
        let mut list = Vec::new();
        for (field, messages) in &self.0 {
            for message in messages {
                list.push(FieldMessage {
                    field: field,
                    message: message,
                });
            }
        }
        list
    }
}

#[derive(Debug, Serialize)]
pub struct FieldMessage<'a> {
    pub field: &'a str,
    pub message: &'a str,
}

/// What a server-rendered handler can answer with: a rendered template, a
/// plain redirect, or a redirect carrying a one-time flash message.
pub enum Page {
    Html(Template),
    Redirect(Redirect),
    Flash(Flash<Redirect>),
}

impl From<Template> for Page {
    fn from(template: Template) -> Page {
        Page::Html(template)
    }
}

impl From<Redirect> for Page {
    fn from(redirect: Redirect) -> Page {
        Page::Redirect(redirect)
    }
}

impl From<Flash<Redirect>> for Page {
    fn from(flash: Flash<Redirect>) -> Page {
        Page::Flash(flash)
    }
}

impl<'r> Responder<'r> for Page {
    fn respond_to(self, req: &Request) -> response::Result<'r> {
        match self {
            Page::Html(template) => template.respond_to(req),
            Page::Redirect(redirect) => redirect.respond_to(req),
            Page::Flash(flash) => flash.respond_to(req),
        }
    }
}

pub type PageResult = Result<Page, AppError>;
