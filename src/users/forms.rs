use diesel::prelude::*;
use regex::Regex;

use types::{AppError, Validate, ValidationError};
use users::models::{User, BODY_LEN};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 5;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
}

pub fn validate_email_format(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(&email.trim().to_lowercase()) {
        Err(ValidationError::from(
            "email",
            format!("Invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < MIN_PASSWORD_LEN {
        Err(ValidationError::from("password", "Password is too short"))
    } else {
        Ok(())
    }
}

#[derive(Debug, FromForm)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl Validate for LoginForm {
    fn validate(&self, _connection: &PgConnection) -> Result<ValidationError, AppError> {
        let mut errors = ValidationError::default();
        if self.email.trim().is_empty() {
            errors.add_error("email", "Email address is required");
        } else if let Err(e) = validate_email_format(&self.email) {
            errors.merge(e);
        }
        if self.password.is_empty() {
            errors.add_error("password", "Password is required");
        }
        Ok(errors)
    }
}

#[derive(Debug, FromForm)]
pub struct RegisterForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm: String,
    pub accept_tos: Option<bool>,
}

impl Validate for RegisterForm {
    /// A registration with an email that is already registered never reaches
    /// the store: it is rejected here, before any write happens.
    fn validate(&self, connection: &PgConnection) -> Result<ValidationError, AppError> {
        let mut errors = ValidationError::default();
        if self.name.trim().is_empty() {
            errors.add_error("name", "NickName is required");
        }
        if self.email.trim().is_empty() {
            errors.add_error("email", "Email address is required");
        } else {
            if let Err(e) = validate_email_format(&self.email) {
                errors.merge(e);
            }
            if User::email_taken(self.email.trim(), connection)? {
                errors.add_error("email", "Email already registered");
            }
        }
        if let Err(e) = validate_password(&self.password) {
            errors.merge(e);
        }
        if self.confirm != self.password {
            errors.add_error("confirm", "Passwords must match");
        }
        if !self.accept_tos.unwrap_or(false) {
            errors.add_error("accept_tos", "You must accept the TOS");
        }
        Ok(errors)
    }
}

#[derive(Debug, FromForm)]
pub struct EditForm {
    pub name: String,
    pub about_me: String,
}

impl EditForm {
    /// Keeping the current name is always fine; a changed name must already be
    /// in the allowed character set and unused by everyone else.
    pub fn validate(
        &self,
        current: &User,
        connection: &PgConnection,
    ) -> Result<ValidationError, AppError> {
        let mut errors = ValidationError::default();
        let name = self.name.trim();
        if name.is_empty() {
            errors.add_error("name", "Name is required");
        } else if name != current.name {
            if name != User::make_valid_name(name) {
                errors.add_error(
                    "name",
                    "This name has invalid characters. Please use letters, numbers, dots and underscores only.",
                );
            } else if User::name_taken(name, connection)? {
                errors.add_error(
                    "name",
                    "This name is already in use. Please choose another one.",
                );
            }
        }
        if self.about_me.trim().is_empty() {
            errors.add_error("about_me", "About me is required");
        } else if self.about_me.chars().count() > BODY_LEN {
            errors.add_error("about_me", "About me is too long");
        }
        Ok(errors)
    }
}

#[derive(Debug, FromForm)]
pub struct PostForm {
    pub body: String,
}

impl Validate for PostForm {
    fn validate(&self, _connection: &PgConnection) -> Result<ValidationError, AppError> {
        let mut errors = ValidationError::default();
        if self.body.trim().is_empty() {
            errors.add_error("body", "Say something first");
        } else if self.body.chars().count() > BODY_LEN {
            errors.add_error("body", format!("Posts are limited to {} characters", BODY_LEN));
        }
        Ok(errors)
    }
}

#[derive(Debug, FromForm)]
pub struct SearchForm {
    pub query: String,
}

impl Validate for SearchForm {
    fn validate(&self, _connection: &PgConnection) -> Result<ValidationError, AppError> {
        let mut errors = ValidationError::default();
        if self.query.trim().is_empty() {
            errors.add_error("query", "Enter something to search for");
        }
        Ok(errors)
    }
}
