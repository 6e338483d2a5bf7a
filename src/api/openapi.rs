use super::handlers::{email, goals, health, leads, modules, password, social, users, waitlist};
use crate::api::error::ErrorBody;
use utoipa::openapi::{Contact, InfoBuilder, License};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::ping,
        health::health,
        users::create,
        users::login,
        users::refresh,
        users::get_self,
        users::update_self,
        users::learning_progress,
        users::quiz_gradings,
        password::forgotten,
        password::reset,
        password::change,
        social::login,
        social::sign_up,
        goals::list,
        goals::create,
        goals::complete,
        goals::incomplete,
        goals::templates,
        modules::list,
        modules::participants,
        modules::search,
        modules::record_progress,
        modules::grade,
        waitlist::list,
        waitlist::join,
        email::preview,
        leads::modules,
        leads::record_progress,
        leads::learning_progress,
    ),
    components(schemas(ErrorBody)),
    tags(
        (name = "health", description = "Liveness and database health"),
        (name = "user", description = "Accounts, sessions and the caller's profile"),
        (name = "password", description = "Password change and recovery"),
        (name = "social", description = "Facebook and Twitter login"),
        (name = "goals", description = "Personal learning goals"),
        (name = "modules", description = "Learning modules, progress and quiz grading"),
        (name = "waitlist", description = "Pre-launch waitlist"),
        (name = "email", description = "Admin email previews"),
        (name = "leads", description = "Anonymous visitors tracked by device"),
    )
)]
struct ApiDoc;

/// The API document with its info block taken from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    doc.info = info;

    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => {
            let name = name.trim();
            let email = email.trim_end_matches('>').trim();
            (
                Some(name).filter(|v| !v.is_empty()),
                Some(email).filter(|v| !v.is_empty()),
            )
        }
        None => (Some(author.trim()).filter(|v| !v.is_empty()), None),
    }
}
