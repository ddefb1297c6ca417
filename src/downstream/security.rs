//! Outbound credentials for downstream calls.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use uuid::Uuid;

use crate::config::SecurityConfig;

const WSSE_NS: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const WSU_NS: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";
const BASE64_BINARY: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Credentials applied to every downstream request of a subscription or
/// publication.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientSecurity {
    Basic { username: String, password: String },
    Bearer { token: String },
    /// WS-Security UsernameToken carried in the SOAP header.
    WsSecurity { username: String, password: String },
}

impl ClientSecurity {
    /// First configured variant wins (basic, then bearer, then WS-Security).
    pub fn from_config(config: &SecurityConfig) -> Option<Self> {
        if let Some(basic) = &config.basic_auth {
            return Some(ClientSecurity::Basic {
                username: basic.username.clone(),
                password: basic.password.clone(),
            });
        }
        if let Some(bearer) = &config.bearer {
            return Some(ClientSecurity::Bearer {
                token: bearer.token.clone(),
            });
        }
        config.ws_security.as_ref().map(|ws| ClientSecurity::WsSecurity {
            username: ws.username.clone(),
            password: ws.password.clone(),
        })
    }

    /// `Authorization` header value, for the variants that use one.
    pub fn authorization(&self) -> Option<String> {
        match self {
            ClientSecurity::Basic { username, password } => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            )),
            ClientSecurity::Bearer { token } => Some(format!("Bearer {}", token)),
            ClientSecurity::WsSecurity { .. } => None,
        }
    }

    /// `wsse:Security` header block, fresh nonce and timestamp per call.
    pub fn soap_header(&self) -> Option<String> {
        match self {
            ClientSecurity::WsSecurity { username, password } => Some(username_token(
                username,
                password,
                Uuid::new_v4().as_bytes(),
                Utc::now(),
            )),
            _ => None,
        }
    }
}

fn username_token(username: &str, password: &str, nonce: &[u8], created: DateTime<Utc>) -> String {
    format!(
        concat!(
            r#"<wsse:Security xmlns:wsse="{wsse}" xmlns:wsu="{wsu}" soap:mustUnderstand="1">"#,
            r#"<wsse:UsernameToken>"#,
            r#"<wsse:Username>{username}</wsse:Username>"#,
            r#"<wsse:Password Type="{text}">{password}</wsse:Password>"#,
            r#"<wsse:Nonce EncodingType="{binary}">{nonce}</wsse:Nonce>"#,
            r#"<wsu:Created>{created}</wsu:Created>"#,
            r#"</wsse:UsernameToken></wsse:Security>"#
        ),
        wsse = WSSE_NS,
        wsu = WSU_NS,
        username = escape(username),
        text = PASSWORD_TEXT,
        password = escape(password),
        binary = BASE64_BINARY,
        nonce = STANDARD.encode(nonce),
        created = created.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

// Keep secrets out of logs.
impl std::fmt::Debug for ClientSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientSecurity::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            ClientSecurity::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
            ClientSecurity::WsSecurity { username, .. } => f
                .debug_struct("WsSecurity")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}
