use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use crate::client::config::Config;
use crate::client::consts::AUTHORIZATION_HEADER;
use crate::error::{Error, Result};

pub fn build_request(config: &Config) -> Result<Request> {
    let mut request = config.base_url().into_client_request()?;
    let api_key = config.api_key().expose_secret();
    if !api_key.is_empty() {
        let value = format!("Bearer {}", api_key)
            .parse()
            .map_err(|_| Error::InvalidRequest("api key is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION_HEADER, value);
    }
    Ok(request)
}
