//! Request binding.
//!
//! A [`Binder`] decodes the request into a concrete type chosen at the call
//! site. [`DefaultBinder`] picks the decoder from the method and the
//! `Content-Type` header:
//!
//! | request                                  | source                   |
//! |------------------------------------------|--------------------------|
//! | GET / DELETE with an empty body          | path params + query      |
//! | `application/json`                       | body, `serde_json`       |
//! | `application/x-www-form-urlencoded`      | body, `serde_urlencoded` |
//! | anything else                            | 415                      |

use crate::context::Context;
use crate::error::{Error, HttpError, Result};
use http::Method;
use http::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

pub const MIME_APPLICATION_JSON: &str = "application/json";
pub const MIME_APPLICATION_FORM: &str = "application/x-www-form-urlencoded";

pub trait Binder: Send + Sync {
    fn bind<T: DeserializeOwned>(&self, c: &Context) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBinder;

impl Binder for DefaultBinder {
    fn bind<T: DeserializeOwned>(&self, c: &Context) -> Result<T> {
        let req = c.request();
        let body = req.body();

        if body.is_empty() {
            if req.method() == Method::GET || req.method() == Method::DELETE {
                return bind_params(c);
            }
            return Err(HttpError::bad_request("Request body can't be empty").into());
        }

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            MIME_APPLICATION_JSON => serde_json::from_slice(body).map_err(json_error),
            MIME_APPLICATION_FORM => serde_urlencoded::from_bytes(body)
                .map_err(|e| HttpError::bad_request(e.to_string()).with_internal(e).into()),
            _ => Err(HttpError::unsupported_media_type().into()),
        }
    }
}

fn json_error(err: serde_json::Error) -> Error {
    let message = match err.classify() {
        Category::Data => "Incorrect data structure".to_string(),
        Category::Syntax | Category::Eof | Category::Io => err.to_string(),
    };
    HttpError::bad_request(message).with_internal(err).into()
}

/// Decode path parameters and query values, path parameters first.
fn bind_params<T: DeserializeOwned>(c: &Context) -> Result<T> {
    let mut pairs: Vec<(&str, &str)> = c
        .param_names()
        .iter()
        .zip(c.param_values())
        .map(|(n, v)| (n.as_str(), v.as_str()))
        .collect();
    let query = c.query_string();
    let query_pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
    pairs.extend(query_pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let encoded = serde_urlencoded::to_string(&pairs).map_err(|e| Error::internal(e.to_string()))?;
    serde_urlencoded::from_str(&encoded)
        .map_err(|e| HttpError::bad_request(e.to_string()).with_internal(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::App;
    use bytes::Bytes;
    use http::{Request, StatusCode};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u32,
        name: String,
    }

    fn context(app: &App, method: Method, uri: &str, ctype: Option<&str>, body: &str) -> Context {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(ctype) = ctype {
            builder = builder.header(CONTENT_TYPE, ctype);
        }
        app.new_context(builder.body(Bytes::from(body.to_string())).unwrap())
    }

    fn status_of(err: Error) -> StatusCode {
        err.status_code()
    }

    #[test]
    fn test_bind_json() {
        let app = App::new();
        let c = context(
            &app,
            Method::POST,
            "/",
            Some("application/json; charset=utf-8"),
            r#"{"id": 1, "name": "Jon"}"#,
        );
        let user: User = c.bind().unwrap();
        assert_eq!(user, User { id: 1, name: "Jon".into() });
    }

    #[test]
    fn test_bind_json_type_error() {
        let app = App::new();
        let c = context(
            &app,
            Method::POST,
            "/",
            Some(MIME_APPLICATION_JSON),
            r#"{"id": "text", "name": "Jon"}"#,
        );
        match c.bind::<User>() {
            Err(Error::Http(e)) => {
                assert_eq!(e.code, StatusCode::BAD_REQUEST);
                assert_eq!(e.message_text(), "Incorrect data structure");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bind_json_syntax_error() {
        let app = App::new();
        let c = context(&app, Method::POST, "/", Some(MIME_APPLICATION_JSON), "{");
        assert_eq!(status_of(c.bind::<User>().unwrap_err()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_bind_form() {
        let app = App::new();
        let c = context(&app, Method::POST, "/", Some(MIME_APPLICATION_FORM), "id=7&name=Ana");
        let user: User = c.bind().unwrap();
        assert_eq!(user, User { id: 7, name: "Ana".into() });
    }

    #[test]
    fn test_bind_query_and_params_on_get() {
        let app = App::new();
        let mut c = context(&app, Method::GET, "/users/3?name=Lee", None, "");
        c.set_params(&["id"], &["3"]);
        let user: User = c.bind().unwrap();
        assert_eq!(user, User { id: 3, name: "Lee".into() });
    }

    #[test]
    fn test_bind_empty_body_on_post() {
        let app = App::new();
        let c = context(&app, Method::POST, "/", Some(MIME_APPLICATION_JSON), "");
        assert_eq!(status_of(c.bind::<User>().unwrap_err()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_bind_unsupported_media_type() {
        let app = App::new();
        let c = context(&app, Method::POST, "/", Some("text/plain"), "hello");
        assert_eq!(
            status_of(c.bind::<User>().unwrap_err()),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }
}
