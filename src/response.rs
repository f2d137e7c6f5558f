use super::{
    cookie::Cookie,
    error::{Error, ErrorKind},
};
use assert_impl::assert_impl;
use reqwest::{
    blocking::Response as ReqwestResponse,
    header::{HeaderMap, SET_COOKIE},
    Method, StatusCode, Url, Version,
};
use std::{fmt::Debug, io::Read, mem::take, result::Result as StdResult};

/// 已组装请求的信息快照
///
/// 记录合并完持久头、临时头、默认 User-Agent 与 Cookie 之后实际发出的请求，
/// 供响应访问与事务日志使用。
#[derive(Debug, Clone)]
pub struct RequestInfo {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl RequestInfo {
    pub(crate) fn new(method: Method, url: Url, headers: HeaderMap, body: Option<Vec<u8>>) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// 获取请求方法
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// 获取请求 URL
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// 获取合并后的请求头
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 获取请求体快照
    ///
    /// 表单、字节、JSON 与 XML 请求会记录请求体，GET 与 multipart 请求不记录。
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// 原始响应中除响应体外的部分
///
/// 响应体在构造 [`Response`] 时已被完整读取，因此原始响应以该类型保留。
#[derive(Debug)]
pub struct ResponseParts {
    status_code: StatusCode,
    version: Version,
    headers: HeaderMap,
    content_length: Option<u64>,
    url: Url,
}

impl ResponseParts {
    /// 创建响应信息
    #[inline]
    pub fn new(
        status_code: StatusCode,
        version: Version,
        headers: HeaderMap,
        content_length: Option<u64>,
        url: Url,
    ) -> Self {
        Self {
            status_code,
            version,
            headers,
            content_length,
            url,
        }
    }

    /// 获取响应状态码
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    /// 获取 HTTP 版本
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// 获取响应头
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 获取 `Content-Length` 头声明的响应体长度
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// 获取重定向后的最终 URL
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl From<&mut ReqwestResponse> for ResponseParts {
    fn from(response: &mut ReqwestResponse) -> Self {
        let content_length = response.content_length();
        Self {
            status_code: response.status(),
            version: response.version(),
            content_length,
            url: response.url().to_owned(),
            headers: take(response.headers_mut()),
        }
    }
}

/// HTTP 请求结果
///
/// 一次请求要么携带错误，要么携带底层响应。传输失败时不保留任何响应信息，
/// 响应体读取失败时保留已获得的响应信息并同时设置错误。
#[derive(Debug)]
pub struct Response {
    error: Option<Error>,
    request: Option<RequestInfo>,
    parts: Option<ResponseParts>,
    content: Vec<u8>,
}

impl Response {
    /// 创建仅携带错误的响应
    #[inline]
    pub fn from_error(error: Error) -> Self {
        Self {
            error: Some(error),
            request: None,
            parts: None,
            content: Vec::new(),
        }
    }

    /// 创建携带底层响应的响应
    #[inline]
    pub fn from_parts(request: RequestInfo, parts: ResponseParts, content: Vec<u8>) -> Self {
        Self {
            error: None,
            request: Some(request),
            parts: Some(parts),
            content,
        }
    }

    /// 设置错误，保留已有的响应信息
    #[inline]
    pub fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    /// 获取请求错误
    #[inline]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// 获取响应状态码，没有底层响应时返回 0
    #[inline]
    pub fn status_code(&self) -> u16 {
        self.parts
            .as_ref()
            .map(|parts| parts.status_code().as_u16())
            .unwrap_or_default()
    }

    /// 获取响应头，没有底层响应时返回 [`None`]
    #[inline]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.parts.as_ref().map(ResponseParts::headers)
    }

    /// 获取 `Content-Length` 头声明的响应体长度，没有则返回 0
    #[inline]
    pub fn content_length(&self) -> u64 {
        self.parts
            .as_ref()
            .and_then(ResponseParts::content_length)
            .unwrap_or_default()
    }

    /// 获取已缓存的响应体，没有或出错时为空
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// 转换为响应体
    #[inline]
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// 获取底层响应信息，没有时返回 [`None`]
    #[inline]
    pub fn resp(&self) -> Option<&ResponseParts> {
        self.parts.as_ref()
    }

    /// 获取产生该响应的请求信息，没有底层响应时返回 [`None`]
    #[inline]
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// 按名称线性查找响应的 `Set-Cookie`，找不到时返回 [`None`]
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.parts.as_ref().and_then(|parts| {
            parts
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .filter_map(Cookie::parse_set_cookie)
                .find(|cookie| cookie.name() == name)
        })
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

/// 响应构造策略
///
/// 客户端在每次传输完成后调用该策略，把原始响应或传输错误加工为 [`Response`]。
/// 默认实现为 [`DefaultResponseBuilder`]，可在
/// [`ClientBuilder::response_builder`](crate::ClientBuilder::response_builder) 中替换。
pub trait ResponseBuilder: Debug + Send + Sync {
    /// 构造响应
    ///
    /// 请求组装失败时 `request` 为 [`None`] 且 `result` 携带错误。
    fn build(
        &self,
        request: Option<RequestInfo>,
        result: StdResult<ReqwestResponse, Error>,
    ) -> Response;
}

/// 默认响应构造策略
///
/// 传输失败时只设置错误并立即返回；成功时把响应体完整读入内存，
/// 读取失败时保留已获得的响应信息并设置错误。
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponseBuilder;

impl ResponseBuilder for DefaultResponseBuilder {
    fn build(
        &self,
        request: Option<RequestInfo>,
        result: StdResult<ReqwestResponse, Error>,
    ) -> Response {
        match result {
            Err(err) => Response::from_error(err),
            Ok(mut raw) => {
                let parts = ResponseParts::from(&mut raw);
                let mut content = Vec::new();
                match raw.read_to_end(&mut content) {
                    Ok(_) => Response {
                        error: None,
                        request,
                        parts: Some(parts),
                        content,
                    },
                    Err(err) => Response {
                        error: Some(Error::new(ErrorKind::ReceiveError, err)),
                        request,
                        parts: Some(parts),
                        content: Vec::new(),
                    },
                }
            }
        }
    }
}
