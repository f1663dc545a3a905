use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{Method, Request};
use http_body_util::Full;
use std::borrow::Cow;
use std::fmt;
use url::Url;

/// Parameter names whose values never appear in `Debug` output
const SENSITIVE_PARAMS: &[&str] = &[
    "client_secret",
    "code",
    "refresh_token",
    "access_token",
    "password",
];

/// Header names whose values never appear in `Debug` output
const SENSITIVE_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie"];

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Description of one outbound HTTP request.
///
/// Provider descriptions keep templates with the static parts of each call
/// (client id, grant type, redirect uri) and the kernel clones them per call
/// to add the dynamic parts (code, state, refresh token). Nothing is sent
/// until a [`Transport`](crate::Transport) executes the template.
///
/// Parameters added with [`add_param`](Self::add_param) land in the query
/// string for methods without a body and in the form body otherwise.
#[derive(Clone)]
pub struct RequestTemplate {
    method: Method,
    url: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
    form: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RequestTemplate {
    /// Create a template for `method` and an absolute `url`.
    ///
    /// # Errors
    /// `UnsupportedMethod` for extension methods, `InvalidUri` when the URL
    /// does not parse or has no host.
    pub fn new(method: Method, url: &str) -> Result<Self, HttpError> {
        if !is_supported_method(&method) {
            return Err(HttpError::UnsupportedMethod(method.to_string()));
        }
        let parsed = Url::parse(url).map_err(|e| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: match e {
                url::ParseError::RelativeUrlWithoutBase => InvalidUriKind::MissingScheme,
                url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
                _ => InvalidUriKind::ParseError,
            },
            reason: e.to_string(),
        })?;
        if !parsed.has_host() {
            return Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }
        Ok(Self {
            method,
            url: parsed,
            headers: Vec::new(),
            form: Vec::new(),
            body: None,
        })
    }

    /// # Errors
    /// See [`new`](Self::new).
    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::new(Method::GET, url)
    }

    /// # Errors
    /// See [`new`](Self::new).
    pub fn post(url: &str) -> Result<Self, HttpError> {
        Self::new(Method::POST, url)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL including every query parameter added so far
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// First value of header `name` (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// First value of query parameter `name`
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn form_params(&self) -> &[(String, String)] {
        &self.form
    }

    /// First value of form parameter `name`
    #[must_use]
    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parameter lookup matching [`add_param`](Self::add_param) placement
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        if self.carries_body() {
            self.form_param(name).map(str::to_owned)
        } else {
            self.query_param(name).map(Cow::into_owned)
        }
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// True for methods that send an entity (POST, PUT, PATCH)
    #[must_use]
    pub fn carries_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    /// Append a header. Repeated names are kept in insertion order.
    ///
    /// # Errors
    /// `InvalidHeaderName` / `InvalidHeaderValue` for malformed input.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<&mut Self, HttpError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.headers.push((name, value));
        Ok(self)
    }

    /// Ask for a JSON response (`Accept: application/json`)
    pub fn accept_json(&mut self) -> &mut Self {
        self.headers.push((
            header::ACCEPT,
            HeaderValue::from_static("application/json"),
        ));
        self
    }

    pub fn add_query_param(&mut self, name: &str, value: &str) -> &mut Self {
        self.url.query_pairs_mut().append_pair(name, value);
        self
    }

    pub fn add_form_param(&mut self, name: &str, value: &str) -> &mut Self {
        self.form.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Add a parameter where the method expects it: query for GET-like
    /// methods, form body for POST/PUT/PATCH.
    pub fn add_param(&mut self, name: &str, value: &str) -> &mut Self {
        if self.carries_body() {
            self.add_form_param(name, value)
        } else {
            self.add_query_param(name, value)
        }
    }

    /// Raw entity, used when no form parameters are present
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// Turn the template into a hyper request.
    ///
    /// Form parameters become an `application/x-www-form-urlencoded` body on
    /// body-carrying methods and extra query pairs otherwise.
    ///
    /// # Errors
    /// `InvalidScheme` when the scheme is not permitted by `security`,
    /// `FormEncode` / `RequestBuild` when the request cannot be assembled.
    pub fn into_http_request(
        self,
        security: TransportSecurity,
    ) -> Result<Request<Full<Bytes>>, HttpError> {
        check_scheme(&self.url, security)?;

        let Self {
            method,
            mut url,
            headers,
            form,
            body,
        } = self;

        let carries_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        let mut content_type = None;
        let entity = if carries_body && !form.is_empty() {
            content_type = Some(HeaderValue::from_static(FORM_CONTENT_TYPE));
            Bytes::from(serde_urlencoded::to_string(&form)?)
        } else {
            if !form.is_empty() {
                url.query_pairs_mut().extend_pairs(form.iter());
            }
            body.unwrap_or_default()
        };

        let uri: http::Uri = url.as_str().parse().map_err(|e: http::uri::InvalidUri| {
            HttpError::InvalidUri {
                url: url.to_string(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            }
        })?;

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            if name == header::CONTENT_TYPE {
                content_type = Some(value);
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }

        Ok(builder.body(Full::new(entity))?)
    }
}

impl fmt::Debug for RequestTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| {
                let v = redact_param(&k, &v);
                (k.into_owned(), v)
            })
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }

        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(n, v)| {
                let shown = if SENSITIVE_HEADERS.contains(&n.as_str()) {
                    "[REDACTED]"
                } else {
                    v.to_str().unwrap_or("<binary>")
                };
                (n.as_str(), shown)
            })
            .collect();

        let form: Vec<(&str, String)> = self
            .form
            .iter()
            .map(|(k, v)| (k.as_str(), redact_param(k, v)))
            .collect();

        f.debug_struct("RequestTemplate")
            .field("method", &self.method)
            .field("url", &url.as_str())
            .field("headers", &headers)
            .field("form", &form)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

fn redact_param(name: &str, value: &str) -> String {
    if SENSITIVE_PARAMS.contains(&name) {
        "[REDACTED]".to_owned()
    } else {
        value.to_owned()
    }
}

fn is_supported_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET
            | Method::POST
            | Method::PUT
            | Method::PATCH
            | Method::DELETE
            | Method::HEAD
            | Method::OPTIONS
            | Method::TRACE
    )
}

fn check_scheme(url: &Url, security: TransportSecurity) -> Result<(), HttpError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" => match security {
            TransportSecurity::AllowInsecureHttp => Ok(()),
            TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        scheme => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(req: Request<Full<Bytes>>) -> String {
        let bytes = req.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn rejects_relative_and_hostless_urls() {
        let err = RequestTemplate::get("/login/oauth/authorize").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::MissingScheme,
                ..
            }
        ));

        let err = RequestTemplate::get("mailto:ops@example.com").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::MissingAuthority,
                ..
            }
        ));
    }

    #[test]
    fn rejects_extension_methods() {
        let brew = Method::from_bytes(b"BREW").unwrap();
        let err = RequestTemplate::new(brew, "https://example.com").unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedMethod(m) if m == "BREW"));
    }

    #[test]
    fn add_param_follows_method() {
        let mut get = RequestTemplate::get("https://gitee.com/api/v5/user").unwrap();
        get.add_param("access_token", "abc");
        assert_eq!(get.query_param("access_token").as_deref(), Some("abc"));
        assert!(get.form_params().is_empty());
        assert_eq!(get.param("access_token").as_deref(), Some("abc"));

        let mut post = RequestTemplate::post("https://gitee.com/oauth/token").unwrap();
        post.add_param("grant_type", "authorization_code");
        assert_eq!(post.form_param("grant_type"), Some("authorization_code"));
        assert!(post.url().query().is_none());
        assert_eq!(post.param("grant_type").as_deref(), Some("authorization_code"));
    }

    #[test]
    fn cloned_templates_are_independent() {
        let mut base = RequestTemplate::post("https://gitee.com/oauth/token").unwrap();
        base.add_param("client_id", "id");

        let mut call = base.clone();
        call.add_param("code", "c-1");

        assert_eq!(base.form_params().len(), 1);
        assert_eq!(call.form_params().len(), 2);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut t = RequestTemplate::get("https://api.github.com/user").unwrap();
        t.add_header("Authorization", "token abc").unwrap();
        t.accept_json();
        assert_eq!(t.header("authorization").unwrap(), "token abc");
        assert_eq!(t.header("ACCEPT").unwrap(), "application/json");
        assert!(t.add_header("bad header", "x").is_err());
        assert!(t.add_header("x-ok", "line\nbreak").is_err());
    }

    #[tokio::test]
    async fn post_form_is_encoded_with_content_type() {
        let mut t = RequestTemplate::post("https://gitee.com/oauth/token").unwrap();
        t.add_param("grant_type", "authorization_code")
            .add_param("redirect_uri", "https://app.example.com/cb?x=1");

        let req = t.into_http_request(TransportSecurity::TlsOnly).unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(
            req.headers().get(header::CONTENT_TYPE).unwrap(),
            FORM_CONTENT_TYPE
        );
        assert_eq!(
            body_string(req).await,
            "grant_type=authorization_code&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb%3Fx%3D1"
        );
    }

    #[tokio::test]
    async fn form_params_on_get_move_to_query() {
        let mut t = RequestTemplate::get("https://example.com/user?a=1").unwrap();
        t.add_form_param("b", "2");
        let req = t.into_http_request(TransportSecurity::TlsOnly).unwrap();
        assert_eq!(req.uri().query(), Some("a=1&b=2"));
        assert!(req.headers().get(header::CONTENT_TYPE).is_none());
        assert_eq!(body_string(req).await, "");
    }

    #[tokio::test]
    async fn raw_body_is_sent_verbatim() {
        let mut t = RequestTemplate::new(Method::PUT, "https://example.com/x").unwrap();
        t.add_header("content-type", "application/json").unwrap();
        t.set_body(r#"{"a":1}"#);
        let req = t.into_http_request(TransportSecurity::TlsOnly).unwrap();
        assert_eq!(
            req.headers().get_all(header::CONTENT_TYPE).iter().count(),
            1
        );
        assert_eq!(body_string(req).await, r#"{"a":1}"#);
    }

    #[test]
    fn plain_http_requires_opt_in() {
        let t = RequestTemplate::get("http://127.0.0.1:8080/token").unwrap();
        let err = t
            .clone()
            .into_http_request(TransportSecurity::TlsOnly)
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { ref scheme, .. } if scheme == "http"));
        assert!(
            t.into_http_request(TransportSecurity::AllowInsecureHttp)
                .is_ok()
        );

        let ftp = RequestTemplate::get("ftp://example.com/file").unwrap();
        assert!(
            ftp.into_http_request(TransportSecurity::AllowInsecureHttp)
                .is_err()
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let mut t = RequestTemplate::post("https://gitee.com/oauth/token?code=abc").unwrap();
        t.add_param("client_secret", "s3cr3t")
            .add_param("client_id", "visible-id");
        t.add_header("Authorization", "Bearer tok").unwrap();

        let dbg = format!("{t:?}");
        assert!(!dbg.contains("s3cr3t"));
        assert!(!dbg.contains("code=abc"));
        assert!(!dbg.contains("Bearer tok"));
        assert!(dbg.contains("visible-id"));
        assert!(dbg.contains("[REDACTED]"));
    }
}
