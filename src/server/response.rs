use crate::dispatcher::HttpReply;
use may_minihttp::Response;

/// `may_minihttp` keeps `&'static str` headers, so dynamic values are leaked.
/// Redirect targets and content types come from a small fixed set.
fn leak_header(name: &str, value: &str) -> &'static str {
    Box::leak(format!("{name}: {value}").into_boxed_str())
}

fn static_content_type(content_type: &str) -> Option<&'static str> {
    match content_type {
        "application/json" => Some("Content-Type: application/json"),
        "text/plain; charset=utf-8" => Some("Content-Type: text/plain; charset=utf-8"),
        "text/html; charset=utf-8" => Some("Content-Type: text/html; charset=utf-8"),
        _ => None,
    }
}

pub fn write_reply(res: &mut Response, reply: HttpReply) {
    res.status_code(reply.status as usize, reply.reason());

    let content_type = static_content_type(&reply.content_type)
        .unwrap_or_else(|| leak_header("Content-Type", &reply.content_type));
    res.header(content_type);

    for (name, value) in &reply.headers {
        res.header(leak_header(name, value));
    }

    res.body_vec(reply.body);
}
