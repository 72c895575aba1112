//! Text rendering of results

use rivet_client::Response;

/// Render a body, replacing invalid UTF-8
pub fn body(response: &Response) -> String {
    response
        .value
        .as_deref()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default()
}

fn rev(response: &Response) -> String {
    response.rev.map_or_else(|| "-".to_string(), |r| r.to_string())
}

/// `get`: body and revision
pub fn entry(response: &Response) -> String {
    format!("{}\trev={}", body(response), rev(response))
}

/// `set`, `del`, `rev`: the revision alone
pub fn revision(response: &Response) -> String {
    rev(response)
}

/// `getdir`: one child name per line
pub fn child(response: &Response) -> String {
    response.path.clone().unwrap_or_default()
}

/// `walk`, `watch`: revision, path, body
pub fn event(response: &Response) -> String {
    format!(
        "{}\t{}\t{}",
        rev(response),
        response.path.as_deref().unwrap_or("-"),
        body(response)
    )
}

/// `stat`: length and revision
pub fn stat(response: &Response) -> String {
    let len = response.len.map_or_else(|| "-".to_string(), |l| l.to_string());
    format!("len={}\trev={}", len, rev(response))
}
