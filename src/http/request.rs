/// HTTP request methods.
///
/// Only GET is served. Any other method token is kept so it can be logged, and
/// answered with 405 Method Not Allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a page
    GET,
    /// Any other token, verbatim
    Other(String),
}

impl Method {
    /// Classifies a method token.
    ///
    /// The comparison is case-sensitive, as in the request line itself.
    ///
    /// # Example
    ///
    /// ```
    /// # use pageserve::http::request::Method;
    /// assert_eq!(Method::from_token("GET"), Method::GET);
    /// assert_eq!(Method::from_token("get"), Method::Other("get".to_string()));
    /// ```
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::GET,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::Other(token) => token,
        }
    }

    pub fn is_get(&self) -> bool {
        matches!(self, Method::GET)
    }
}

/// A parsed request line.
///
/// Headers and bodies are never looked at, so this is all the server knows about
/// a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The HTTP method
    pub method: Method,
    /// The request path, verbatim (e.g. "/home")
    pub path: String,
    /// Protocol version token, when the client sent one
    pub version: Option<String>,
}

impl Request {
    /// Version token, defaulting to `HTTP/1.0` for bare two-token request lines.
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or("HTTP/1.0")
    }
}
