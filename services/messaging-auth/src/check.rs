//! `GET /?user=<id>&pass=<token>`: does `token` authenticate `user`?

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use tokio::time::timeout;

use crate::error::ApiError;
use crate::AppState;

static CHECKS_TOTAL: Lazy<common_obs::CounterVec> = Lazy::new(|| {
    let counter = common_obs::register_counter(
        "messaging_auth_checks_total",
        "Credential checks by outcome",
        &["outcome"],
    );
    for outcome in [
        "match",
        "mismatch",
        "invalid_request",
        "unauthorized",
        "failed_dependency",
        "internal",
    ] {
        counter.ensure(&[outcome]);
    }
    counter
});

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CheckPasswordQuery {
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// A completed check. Both outcomes answer `200`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Match,
    Mismatch,
}

impl CheckOutcome {
    pub fn body(self) -> &'static str {
        match self {
            CheckOutcome::Match => "true",
            CheckOutcome::Mismatch => "false",
        }
    }

    fn label(self) -> &'static str {
        match self {
            CheckOutcome::Match => "match",
            CheckOutcome::Mismatch => "mismatch",
        }
    }
}

impl IntoResponse for CheckOutcome {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.body()).into_response()
    }
}

pub async fn check_password(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Result<CheckOutcome, ApiError> {
    let result = match CheckPasswordQuery::parse(raw.as_deref()) {
        Ok(query) => check(&state, query).await,
        Err(error) => Err(error),
    };

    let outcome = match &result {
        Ok(outcome) => outcome.label(),
        Err(ApiError::InvalidRequest { .. }) => "invalid_request",
        Err(ApiError::Unauthorized) => "unauthorized",
        Err(ApiError::FailedDependency(_)) => "failed_dependency",
        Err(ApiError::Internal(_)) => "internal",
    };
    CHECKS_TOTAL.inc(&[outcome], 1);

    result
}

impl CheckPasswordQuery {
    /// Parse an `application/x-www-form-urlencoded` query string.
    ///
    /// When a key repeats, the last occurrence wins. A `user` or `pass` value
    /// that does not decode to UTF-8 rejects the whole request; other keys
    /// are ignored.
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        let mut query = Self::default();
        let pairs = raw.unwrap_or_default().split('&');
        for pair in pairs.filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match decode_component(key).as_deref() {
                Ok("user") => &mut query.user,
                Ok("pass") => &mut query.pass,
                _ => continue,
            };
            let value = decode_component(value).map_err(|error| ApiError::InvalidRequest {
                message: format!("query value is not valid UTF-8: {error}"),
            })?;
            *slot = Some(value);
        }
        Ok(query)
    }
}

fn decode_component(raw: &str) -> Result<String, std::str::Utf8Error> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8().map(Cow::into_owned)
}

async fn check(state: &AppState, query: CheckPasswordQuery) -> Result<CheckOutcome, ApiError> {
    let user = non_empty(query.user, "user")?;
    let token = non_empty(query.pass, "pass")?;

    let resolved = timeout(state.validation_timeout, state.auth.validate_token(&token))
        .await
        .map_err(|_| {
            ApiError::FailedDependency(format!(
                "token validation exceeded {}ms",
                state.validation_timeout.as_millis()
            ))
        })??;

    let outcome = match resolved {
        Some(owner) if owner == user => CheckOutcome::Match,
        Some(owner) => {
            tracing::debug!(%user, %owner, "token belongs to another user");
            CheckOutcome::Mismatch
        }
        None => CheckOutcome::Mismatch,
    };
    tracing::info!(event = "credential_check", %user, outcome = outcome.label());

    Ok(outcome)
}

fn non_empty(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest {
            message: format!("missing query parameter `{name}`"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_bodies_are_literal_booleans() {
        assert_eq!(CheckOutcome::Match.body().len(), 4);
        assert_eq!(CheckOutcome::Mismatch.body(), "false");
    }

    #[test]
    fn empty_parameters_count_as_missing() {
        assert!(non_empty(Some(String::new()), "user").is_err());
        assert!(non_empty(None, "pass").is_err());
        assert_eq!(non_empty(Some("alice".to_string()), "user").unwrap(), "alice");
    }

    fn parsed(raw: &str) -> CheckPasswordQuery {
        CheckPasswordQuery::parse(Some(raw)).expect("parses")
    }

    #[test]
    fn last_repeated_key_wins() {
        let query = parsed("user=bob&user=alice&pass=T0&pass=T1");
        assert_eq!(query.user.as_deref(), Some("alice"));
        assert_eq!(query.pass.as_deref(), Some("T1"));
    }

    #[test]
    fn plus_and_percent_escapes_are_decoded() {
        let query = parsed("user=carol%40example.com&pass=a+b%2Bc");
        assert_eq!(query.user.as_deref(), Some("carol@example.com"));
        assert_eq!(query.pass.as_deref(), Some("a b+c"));
    }

    #[test]
    fn keys_without_values_are_empty() {
        let query = parsed("user&pass=");
        assert_eq!(query.user.as_deref(), Some(""));
        assert_eq!(query.pass.as_deref(), Some(""));
    }

    #[test]
    fn invalid_utf8_in_credentials_is_rejected() {
        assert!(matches!(
            CheckPasswordQuery::parse(Some("user=alice&pass=%FF")),
            Err(ApiError::InvalidRequest { .. })
        ));
        assert!(matches!(
            CheckPasswordQuery::parse(Some("user=%C3%28&pass=T1")),
            Err(ApiError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn invalid_utf8_in_other_keys_is_ignored() {
        let query = parsed("user=alice&pass=T1&extra=%FF&%FE=x");
        assert_eq!(query.user.as_deref(), Some("alice"));
        assert_eq!(query.pass.as_deref(), Some("T1"));
    }

    #[test]
    fn absent_query_has_no_parameters() {
        assert_eq!(
            CheckPasswordQuery::parse(None).unwrap(),
            CheckPasswordQuery::default()
        );
    }
}
