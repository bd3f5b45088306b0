use serde::Deserialize;
use url::Url;

use crate::api::ApiRequest;
use crate::config::ApiConfig;

use super::AuthError;

const GRANT_TYPE: &str = "authorization_code";

/// URL of the Unsplash consent page the user signs in on.
pub fn authorization_url(config: &ApiConfig) -> Url {
    let mut url = config.oauth_url(&["oauth", "authorize"]);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("client_id", &config.client_id);
        pairs.append_pair("redirect_uri", &config.redirect_uri);
        pairs.append_pair("response_type", "code");
        if !config.scopes.is_empty() {
            pairs.append_pair("scope", &config.scopes.join(" "));
        }
    }
    url
}

/// Extract the authorization code from a redirect URL or a pasted bare code.
pub fn code_from_redirect(input: &str, config: &ApiConfig) -> Result<String, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::MissingAuthorizationCode);
    }

    let expected = Url::parse(&config.redirect_uri).map_err(|err| {
        AuthError::InvalidRequest(format!("invalid redirect uri {}: {err}", config.redirect_uri))
    })?;

    let url = match Url::parse(input) {
        // Codes may contain ':'; only a redirect-shaped input is treated as a URL.
        Ok(url) if url.scheme() == expected.scheme() || input.contains("://") => url,
        _ => return Ok(input.to_owned()),
    };

    if !same_target(&url, &expected) {
        return Err(AuthError::InvalidRequest(format!(
            "redirect target does not match {}",
            config.redirect_uri
        )));
    }

    let mut code: Option<String> = None;
    let mut error: Option<String> = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = error {
        return Err(AuthError::AccessDenied(err));
    }
    code.filter(|code| !code.is_empty())
        .ok_or(AuthError::MissingAuthorizationCode)
}

fn same_target(url: &Url, expected: &Url) -> bool {
    url.scheme() == expected.scheme()
        && url.host_str() == expected.host_str()
        && url.port_or_known_default() == expected.port_or_known_default()
        && url.path().trim_end_matches('/') == expected.path().trim_end_matches('/')
}

/// Build the form-encoded code exchange request.
pub(crate) fn token_request(config: &ApiConfig, code: &str) -> Result<ApiRequest, AuthError> {
    if code.trim().is_empty() {
        return Err(AuthError::InvalidRequest("empty authorization code".into()));
    }
    if config.client_id.is_empty() {
        return Err(AuthError::InvalidRequest("missing client id".into()));
    }
    if config.client_secret.is_empty() {
        return Err(AuthError::InvalidRequest("missing client secret".into()));
    }

    let request = ApiRequest::post(config.oauth_url(&["oauth", "token"]))
        .accept_json()
        .form([
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code", code),
            ("grant_type", GRANT_TYPE),
        ]);
    Ok(request)
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
}
