//! Client id extraction for listen requests.
//!
//! The gateway forwards the upgrade request of a connection when it starts
//! listening. Where the client id lives in that request differs between
//! deployments, so the lookup is a strategy chosen by `LISTEN__CLIENT_ID_SOURCE`.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};

use crate::auth::JwtValidator;
use crate::config::{ClientIdSource, ConfigurationError, JwtConfig, ListenConfig};

pub const DEFAULT_CLIENT_ID_HEADER: &str = "x-client-id";
pub const DEFAULT_CLIENT_ID_QUERY: &str = "clientId";

/// The parts of a listen request a client id can be read from
pub struct ListenRequest<'a> {
    pub headers: &'a HeaderMap,
    pub query: &'a HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("No client id in {location} {key}")]
    Missing { location: &'static str, key: String },

    #[error("Client id in {location} is not valid: {reason}")]
    Invalid { location: &'static str, reason: String },
}

pub trait ClientIdExtractor: Send + Sync {
    fn source(&self) -> ClientIdSource;

    fn extract(&self, request: &ListenRequest<'_>) -> Result<String, ExtractionError>;
}

fn present(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Reads a request header
pub struct HeaderExtractor {
    name: String,
}

impl ClientIdExtractor for HeaderExtractor {
    fn source(&self) -> ClientIdSource {
        ClientIdSource::Header
    }

    fn extract(&self, request: &ListenRequest<'_>) -> Result<String, ExtractionError> {
        let value = request
            .headers
            .get(self.name.as_str())
            .ok_or_else(|| ExtractionError::Missing {
                location: "header",
                key: self.name.clone(),
            })?;

        let value = value.to_str().map_err(|_| ExtractionError::Invalid {
            location: "header",
            reason: format!("{} is not visible ASCII", self.name),
        })?;

        present(value).ok_or_else(|| ExtractionError::Missing {
            location: "header",
            key: self.name.clone(),
        })
    }
}

/// Reads a query string parameter
pub struct QueryExtractor {
    name: String,
}

impl ClientIdExtractor for QueryExtractor {
    fn source(&self) -> ClientIdSource {
        ClientIdSource::Query
    }

    fn extract(&self, request: &ListenRequest<'_>) -> Result<String, ExtractionError> {
        request
            .query
            .get(&self.name)
            .and_then(|v| present(v))
            .ok_or_else(|| ExtractionError::Missing {
                location: "query parameter",
                key: self.name.clone(),
            })
    }
}

/// Reads the `Sec-WebSocket-Protocol` list.
///
/// With a prefix configured, the first protocol carrying the prefix wins and
/// the prefix is stripped; otherwise the first protocol is the client id.
pub struct SubprotocolExtractor {
    prefix: Option<String>,
}

impl ClientIdExtractor for SubprotocolExtractor {
    fn source(&self) -> ClientIdSource {
        ClientIdSource::Subprotocol
    }

    fn extract(&self, request: &ListenRequest<'_>) -> Result<String, ExtractionError> {
        let missing = || ExtractionError::Missing {
            location: "header",
            key: header::SEC_WEBSOCKET_PROTOCOL.to_string(),
        };

        let protocols = request
            .headers
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let found = match self.prefix.as_deref() {
            Some(prefix) => protocols
                .filter_map(|p| p.strip_prefix(prefix))
                .find_map(present),
            None => protocols.map(str::to_string).next(),
        };

        found.ok_or_else(missing)
    }
}

/// Validates a bearer token and uses its `sub` claim.
///
/// The token is read from the `token` query parameter first, then from the
/// `Authorization: Bearer` header.
pub struct JwtSubjectExtractor {
    validator: JwtValidator,
}

impl JwtSubjectExtractor {
    fn token<'a>(request: &'a ListenRequest<'_>) -> Option<&'a str> {
        if let Some(token) = request.query.get("token") {
            return Some(token.as_str());
        }

        request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

impl ClientIdExtractor for JwtSubjectExtractor {
    fn source(&self) -> ClientIdSource {
        ClientIdSource::Jwt
    }

    fn extract(&self, request: &ListenRequest<'_>) -> Result<String, ExtractionError> {
        let token = Self::token(request).ok_or_else(|| ExtractionError::Missing {
            location: "bearer token",
            key: "token".to_string(),
        })?;

        let claims = self
            .validator
            .validate(token)
            .map_err(|e| ExtractionError::Invalid {
                location: "bearer token",
                reason: e.to_string(),
            })?;

        present(claims.client_id()).ok_or_else(|| ExtractionError::Missing {
            location: "bearer token",
            key: "sub".to_string(),
        })
    }
}

/// Build the extractor selected by configuration
pub fn create_extractor(
    listen: &ListenConfig,
    jwt: &JwtConfig,
) -> Result<Box<dyn ClientIdExtractor>, ConfigurationError> {
    let key = listen.client_id_key.clone();

    let extractor: Box<dyn ClientIdExtractor> = match listen.client_id_source {
        ClientIdSource::Header => Box::new(HeaderExtractor {
            name: key
                .unwrap_or_else(|| DEFAULT_CLIENT_ID_HEADER.to_string())
                .to_ascii_lowercase(),
        }),
        ClientIdSource::Query => Box::new(QueryExtractor {
            name: key.unwrap_or_else(|| DEFAULT_CLIENT_ID_QUERY.to_string()),
        }),
        ClientIdSource::Subprotocol => Box::new(SubprotocolExtractor { prefix: key }),
        ClientIdSource::Jwt => Box::new(JwtSubjectExtractor {
            validator: JwtValidator::new(jwt)?,
        }),
    };

    tracing::info!(source = ?extractor.source(), "Client id extractor configured");
    Ok(extractor)
}
