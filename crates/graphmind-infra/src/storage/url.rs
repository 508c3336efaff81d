//! Public object URL construction. No vendor calls.

/// Percent-encodes each path segment of `key`, keeping `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds the unauthenticated GET URL of `key` in `bucket`.
///
/// Path-style: `<endpoint>/<bucket>/<key>`.
/// Virtual-hosted: `<scheme>://<bucket>.<host>/<key>`.
pub fn public_object_url(endpoint: &str, bucket: &str, key: &str, path_style: bool) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    let key = encode_key(key.trim_start_matches('/'));

    if path_style {
        return format!("{endpoint}/{bucket}/{key}");
    }

    match endpoint.split_once("://") {
        Some((scheme, host)) => format!("{scheme}://{bucket}.{host}/{key}"),
        None => format!("https://{bucket}.{endpoint}/{key}"),
    }
}

/// Regional AWS endpoint used when no endpoint is configured.
pub fn aws_default_endpoint(region: &str) -> String {
    format!("https://s3.{region}.amazonaws.com")
}
