use url::Url;

use crate::error::{self, Error};

pub(crate) fn get_env_url() -> String {
    use std::env;
    let var = env::var("FAKTORY_PROVIDER").unwrap_or_else(|_| "FAKTORY_URL".to_string());
    env::var(var).unwrap_or_else(|_| "tcp://localhost:7419".to_string())
}

pub(crate) fn host_from_url(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or("localhost"),
        url.port().unwrap_or(7419)
    )
}

pub(crate) fn url_parse(url: &str) -> Result<Url, Error> {
    // bare `host:port` endpoints are accepted; any scheme prefix is only
    // there to be stripped
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("tcp://{}", url)
    };

    let url = Url::parse(&url).map_err(error::Connect::ParseUrl)?;
    if url.host_str().map_or(true, |h| h.is_empty()) {
        return Err(error::Connect::MissingHostname.into());
    }

    Ok(url)
}

pub(crate) fn parse_provided_or_from_env(url: Option<&str>) -> Result<Url, Error> {
    url_parse(url.unwrap_or(&get_env_url()))
}
