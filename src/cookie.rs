use std::fmt;

/// HTTP Cookie
///
/// 请求方向上仅使用名称和值，响应方向上会附带 `Set-Cookie` 头中解析出的常见属性。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    expires: Option<String>,
    max_age: Option<i64>,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    /// 创建仅包含名称和值的 Cookie
    #[inline]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }

    /// 获取 Cookie 名称
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取 Cookie 值
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// 获取 `Domain` 属性
    #[inline]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// 获取 `Path` 属性
    #[inline]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// 获取未解析的 `Expires` 属性
    #[inline]
    pub fn expires(&self) -> Option<&str> {
        self.expires.as_deref()
    }

    /// 获取 `Max-Age` 属性
    #[inline]
    pub fn max_age(&self) -> Option<i64> {
        self.max_age
    }

    /// 是否带有 `Secure` 属性
    #[inline]
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// 是否带有 `HttpOnly` 属性
    #[inline]
    pub fn http_only(&self) -> bool {
        self.http_only
    }

    pub(crate) fn parse_set_cookie(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Self::new(name, value.trim());
        for attr in parts {
            if attr.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if attr.eq_ignore_ascii_case("httponly") {
                cookie.http_only = true;
            } else if let Some((key, val)) = attr.split_once('=') {
                let val = val.trim();
                match key.trim().to_ascii_lowercase().as_str() {
                    "domain" => cookie.domain = Some(val.to_owned()),
                    "path" => cookie.path = Some(val.to_owned()),
                    "expires" => cookie.expires = Some(val.to_owned()),
                    "max-age" => cookie.max_age = val.parse().ok(),
                    _ => {}
                }
            }
        }
        Some(cookie)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for Cookie {
    #[inline]
    fn from((name, value): (N, V)) -> Self {
        Self::new(name, value)
    }
}
