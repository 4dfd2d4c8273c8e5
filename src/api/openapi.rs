use crate::{
    api::{
        RESOURCE_ROUTES,
        handlers::{auth, configs, health, jobs, roles},
    },
    resources::Action,
};
use utoipa::openapi::{
    Components, Contact, InfoBuilder, License, OpenApi, OpenApiBuilder, ResponseBuilder, Tag,
    path::{HttpMethod, OperationBuilder},
    security::{HttpAuthScheme, HttpBuilder, SecurityRequirement, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, mut openapi) = api_router().split_for_parts();
    document_resources(&mut openapi);
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Routes with a `#[utoipa::path]` are added here via `.routes(routes!(...))`.
/// The generic resource routes are mounted in `api::app` and documented by
/// [`document_resources`].
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login))
        .routes(routes!(auth::refresh))
        .routes(routes!(auth::captcha))
        .routes(routes!(auth::logout))
        .routes(routes!(configs::info))
        .routes(routes!(roles::permission_setting))
        .routes(routes!(jobs::run_task))
        .routes(routes!(jobs::submit))
        .routes(routes!(jobs::status));

    router.get_openapi_mut().tags = Some(vec![
        tag("auth", "Login, token refresh and logout"),
        tag("system", "Users, roles, departments and configuration"),
        tag("autotest", "Test environments and tasks"),
        tag("jobs", "Background job submission and status"),
        tag("health", "Service health"),
    ]);

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

/// Add the seven generic routes of every resource, plus the bearer scheme.
pub(crate) fn document_resources(openapi: &mut OpenApi) {
    let components = openapi.components.get_or_insert_with(Components::new);
    components.add_security_scheme(
        "bearer",
        SecurityScheme::Http(
            HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .build(),
        ),
    );

    for route in RESOURCE_ROUTES {
        let operations = [
            ("list", HttpMethod::Get, Action::Query, "Page of visible rows"),
            ("detail", HttpMethod::Get, Action::Query, "One visible row by `id`"),
            ("create", HttpMethod::Post, Action::Create, "Create a row"),
            ("update", HttpMethod::Put, Action::Update, "Update a row by `id`"),
            ("delete", HttpMethod::Delete, Action::Delete, "Delete rows by `id` or `ids`"),
            (
                "available/setting",
                HttpMethod::Patch,
                Action::Patch,
                "Enable or disable rows",
            ),
            ("export", HttpMethod::Post, Action::Export, "Spreadsheet of matching rows"),
        ];

        for (suffix, method, action, summary) in operations {
            let operation = OperationBuilder::new()
                .tag(route.tag)
                .summary(Some(format!("{summary} ({})", route.kind)))
                .description(Some(format!(
                    "Requires `{}`.",
                    route.permissions.of(action)
                )))
                .operation_id(Some(format!(
                    "{}_{}",
                    route.kind,
                    suffix.replace('/', "_")
                )))
                .security(SecurityRequirement::new("bearer", Vec::<String>::new()))
                .response("200", ResponseBuilder::new().description("`{code: 0, msg, data}`").build())
                .response("401", ResponseBuilder::new().description("Missing or invalid token").build())
                .response("403", ResponseBuilder::new().description("Missing permission").build())
                .build();

            openapi.paths.add_path_operation(
                format!("{}/{suffix}", route.prefix),
                vec![method],
                operation,
            );
        }
    }
}

fn cargo_openapi() -> OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
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
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => {
            let name = author[..start].trim();
            let email = author[start + 1..].trim_end_matches('>').trim();
            (
                (!name.is_empty()).then_some(name),
                (!email.is_empty()).then_some(email),
            )
        }
        None => {
            let name = author.trim();
            ((!name.is_empty()).then_some(name), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_with_email() {
        assert_eq!(
            parse_author("Jane Doe <jane@example.com>"),
            (Some("Jane Doe"), Some("jane@example.com"))
        );
        assert_eq!(parse_author("Jane Doe"), (Some("Jane Doe"), None));
        assert_eq!(parse_author("<jane@example.com>"), (None, Some("jane@example.com")));
    }

    #[test]
    fn document_lists_generic_and_custom_routes() {
        let doc = openapi();
        let paths = &doc.paths.paths;
        for path in [
            "/health",
            "/api/v1/system/auth/login",
            "/api/v1/system/role/list",
            "/api/v1/system/role/permission/setting",
            "/api/v1/system/user/available/setting",
            "/api/v1/autotest/task/run",
            "/api/v1/jobs/status",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(
            doc.components
                .as_ref()
                .is_some_and(|components| components.security_schemes.contains_key("bearer"))
        );
    }
}
