use axum::{http::StatusCode, response::{Html, IntoResponse, Response}};

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

pub fn sorry(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(include_res!(str, "/pages/sorry.html").replace("{what}", what)),
    )
        .into_response()
}
