use super::{
    builder::ClientBuilder,
    callback::ResponseHandler,
    cookie::Cookie,
    encode_form,
    error::{from_reqwest_error, Error, ErrorKind},
    multipart::Multipart,
    response::{RequestInfo, Response, ResponseBuilder},
    spawn::spawn,
    CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, CONTENT_TYPE_XML, USER_AGENT_CHROME_PC,
};
use anyhow::anyhow;
use assert_impl::assert_impl;
use chrono::Local;
use reqwest::{
    blocking::{Body, Client as ReqwestClient, Request as ReqwestRequest},
    header::{HeaderMap, HeaderValue, IntoHeaderName, CONTENT_TYPE, COOKIE, USER_AGENT},
    Method,
};
use serde::Serialize;
use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    io::Write,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

static CLIENT_SEQUENCE: AtomicUsize = AtomicUsize::new(1);

/// HTTP 客户端
///
/// 由 [`ClientBuilder`] 构建，可克隆，克隆体共享同一份状态，可跨线程使用。
/// 每个请求都经过同样的四步：组装、发送、构造响应、记录日志。
/// 同步接口总是返回 [`Response`]，发送后产生的错误由
/// [`Response::error`] 携带；异步接口只把发送前就能检查出的错误同步返回。
///
/// ### 代码示例
///
/// ```no_run
/// use easyhttp::ClientBuilder;
///
/// # fn main() -> Result<(), easyhttp::BuildError> {
/// let client = ClientBuilder::new().build()?;
/// let response = client.get("http://127.0.0.1:8080/ping");
/// if response.error().is_none() {
///     println!("{}: {}", response.status_code(), String::from_utf8_lossy(response.content()));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: usize,
    http: ReqwestClient,
    headers: RwLock<HeaderMap>,
    cookies: RwLock<Vec<Cookie>>,
    header_overlay: Mutex<Option<HeaderMap>>,
    cookie_overlay: Mutex<Option<Vec<Cookie>>>,
    response_builder: Box<dyn ResponseBuilder>,
    log: TransactionLog,
}

enum Payload {
    Empty,
    Bytes(Vec<u8>),
    Multipart(Multipart),
}

impl Client {
    /// 创建 HTTP 客户端构建器
    #[inline]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// 设置临时 HTTP 头，仅下一次请求生效
    ///
    /// 同名的头在下一次请求中覆盖持久头，请求组装后即被清除，
    /// 组装失败也会被清除。
    #[inline]
    pub fn with_headers(&self, headers: HeaderMap) -> &Self {
        *self.inner.header_overlay.lock().unwrap() = Some(headers);
        self
    }

    /// 设置临时 Cookie，仅下一次请求生效
    #[inline]
    pub fn with_cookies(&self, cookies: Vec<Cookie>) -> &Self {
        *self.inner.cookie_overlay.lock().unwrap() = Some(cookies);
        self
    }

    /// 追加持久 HTTP 头，对之后的每一次请求生效
    #[inline]
    pub fn add_header(&self, name: impl IntoHeaderName, value: HeaderValue) {
        self.inner.headers.write().unwrap().insert(name, value);
    }

    /// 重置持久 HTTP 头
    #[inline]
    pub fn set_headers(&self, headers: HeaderMap) {
        *self.inner.headers.write().unwrap() = headers;
    }

    /// 追加持久 Cookie，对之后的每一次请求生效
    #[inline]
    pub fn add_cookies(&self, cookies: Vec<Cookie>) {
        self.inner.cookies.write().unwrap().extend(cookies);
    }

    /// 重置持久 Cookie
    #[inline]
    pub fn set_cookies(&self, cookies: Vec<Cookie>) {
        *self.inner.cookies.write().unwrap() = cookies;
    }

    /// 发起 GET 请求
    #[inline]
    pub fn get(&self, url: &str) -> Response {
        self.send(Method::GET, url, Payload::Empty, |_| {})
    }

    /// 发起 GET 异步请求，使用回调函数
    ///
    /// 请求被调度后立即返回，回调恰好被调用一次。响应构造过程中的 panic
    /// 会在工作线程边界被拦截，此时回调收到携带
    /// [`ErrorKind::UnknownError`] 错误的响应。
    #[inline]
    pub fn get_async(
        &self,
        url: &str,
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error> {
        self.send_async(Method::GET, url, Payload::Empty, |_| {}, callback)
    }

    /// 发起 GET 异步请求，使用回调接口
    #[inline]
    pub fn get_async_with_handler(
        &self,
        url: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), Error> {
        self.get_async(url, move |response| handler.on_response(response))
    }

    /// 发起 POST 表单请求
    ///
    /// 键值对被编码为 `application/x-www-form-urlencoded` 请求体，
    /// 空键值对产生空请求体。
    #[inline]
    pub fn post_form<I, K, V>(&self, url: &str, pairs: I) -> Response
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = encode_form(pairs);
        self.send(
            Method::POST,
            url,
            Payload::Bytes(body.into_bytes()),
            set_content_type(CONTENT_TYPE_FORM),
        )
    }

    /// 发起 POST 表单异步请求，使用回调函数
    #[inline]
    pub fn post_form_async<I, K, V>(
        &self,
        url: &str,
        pairs: I,
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = encode_form(pairs);
        self.send_async(
            Method::POST,
            url,
            Payload::Bytes(body.into_bytes()),
            set_content_type(CONTENT_TYPE_FORM),
            callback,
        )
    }

    /// 发起 POST 表单异步请求，使用回调接口
    #[inline]
    pub fn post_form_async_with_handler<I, K, V>(
        &self,
        url: &str,
        pairs: I,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.post_form_async(url, pairs, move |response| handler.on_response(response))
    }

    /// 发起 POST 字节请求
    ///
    /// `mutate` 在请求头组装完成后最后执行，常用来设置 Content-Type。
    #[inline]
    pub fn post_bytes(
        &self,
        url: &str,
        bytes: Vec<u8>,
        mutate: impl FnOnce(&mut HeaderMap),
    ) -> Response {
        self.send(Method::POST, url, Payload::Bytes(bytes), mutate)
    }

    /// 发起 POST 字节异步请求，使用回调函数
    #[inline]
    pub fn post_bytes_async(
        &self,
        url: &str,
        bytes: Vec<u8>,
        mutate: impl FnOnce(&mut HeaderMap),
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error> {
        self.send_async(Method::POST, url, Payload::Bytes(bytes), mutate, callback)
    }

    /// 发起 POST 字节异步请求，使用回调接口
    #[inline]
    pub fn post_bytes_async_with_handler(
        &self,
        url: &str,
        bytes: Vec<u8>,
        mutate: impl FnOnce(&mut HeaderMap),
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), Error> {
        self.post_bytes_async(url, bytes, mutate, move |response| {
            handler.on_response(response)
        })
    }

    /// 发起 POST JSON 请求
    ///
    /// 序列化失败时不发出请求，错误由返回的 [`Response::error`] 携带。
    pub fn post_json<T: Serialize>(&self, url: &str, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => self.send(
                Method::POST,
                url,
                Payload::Bytes(body),
                set_content_type(CONTENT_TYPE_JSON),
            ),
            Err(err) => self.assembly_failure(Error::from(err)),
        }
    }

    /// 发起 POST JSON 异步请求，使用回调函数
    ///
    /// 序列化在调度前完成，失败时同步返回错误，回调不会被调用。
    pub fn post_json_async<T: Serialize>(
        &self,
        url: &str,
        value: &T,
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error> {
        let body = serde_json::to_vec(value)?;
        self.send_async(
            Method::POST,
            url,
            Payload::Bytes(body),
            set_content_type(CONTENT_TYPE_JSON),
            callback,
        )
    }

    /// 发起 POST JSON 异步请求，使用回调接口
    #[inline]
    pub fn post_json_async_with_handler<T: Serialize>(
        &self,
        url: &str,
        value: &T,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), Error> {
        self.post_json_async(url, value, move |response| handler.on_response(response))
    }

    /// 发起 POST XML 请求
    ///
    /// 序列化失败时不发出请求，错误由返回的 [`Response::error`] 携带。
    pub fn post_xml<T: Serialize>(&self, url: &str, value: &T) -> Response {
        match quick_xml::se::to_string(value) {
            Ok(body) => self.send(
                Method::POST,
                url,
                Payload::Bytes(body.into_bytes()),
                set_content_type(CONTENT_TYPE_XML),
            ),
            Err(err) => self.assembly_failure(Error::new(ErrorKind::SerializeError, err)),
        }
    }

    /// 发起 POST XML 异步请求，使用回调函数
    ///
    /// 与同步接口使用同一个 XML 序列化器。序列化在调度前完成，
    /// 失败时同步返回错误，回调不会被调用。
    pub fn post_xml_async<T: Serialize>(
        &self,
        url: &str,
        value: &T,
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error> {
        let body = quick_xml::se::to_string(value)
            .map_err(|err| Error::new(ErrorKind::SerializeError, err))?;
        self.send_async(
            Method::POST,
            url,
            Payload::Bytes(body.into_bytes()),
            set_content_type(CONTENT_TYPE_XML),
            callback,
        )
    }

    /// 发起 POST XML 异步请求，使用回调接口
    #[inline]
    pub fn post_xml_async_with_handler<T: Serialize>(
        &self,
        url: &str,
        value: &T,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), Error> {
        self.post_xml_async(url, value, move |response| handler.on_response(response))
    }

    /// 发起 POST Multipart 请求
    ///
    /// Content-Type 取自表单自身携带的分隔符。
    pub fn post_multipart(&self, url: &str, multipart: Multipart) -> Response {
        let content_type = multipart.content_type().to_owned();
        self.send(
            Method::POST,
            url,
            Payload::Multipart(multipart),
            move |headers| {
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    headers.insert(CONTENT_TYPE, value);
                }
            },
        )
    }

    /// 发起 POST Multipart 异步请求，使用回调函数
    pub fn post_multipart_async(
        &self,
        url: &str,
        multipart: Multipart,
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error> {
        let content_type = multipart.content_type().to_owned();
        self.send_async(
            Method::POST,
            url,
            Payload::Multipart(multipart),
            move |headers| {
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    headers.insert(CONTENT_TYPE, value);
                }
            },
            callback,
        )
    }

    /// 发起 POST Multipart 异步请求，使用回调接口
    #[inline]
    pub fn post_multipart_async_with_handler(
        &self,
        url: &str,
        multipart: Multipart,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), Error> {
        self.post_multipart_async(url, multipart, move |response| {
            handler.on_response(response)
        })
    }

    pub(crate) fn from_build(
        http: ReqwestClient,
        headers: HeaderMap,
        cookies: Vec<Cookie>,
        response_builder: Box<dyn ResponseBuilder>,
        log_sink: Box<dyn Write + Send>,
        logging: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id: CLIENT_SEQUENCE.fetch_add(1, Relaxed),
                http,
                headers: RwLock::new(headers),
                cookies: RwLock::new(cookies),
                header_overlay: Mutex::new(None),
                cookie_overlay: Mutex::new(None),
                response_builder,
                log: TransactionLog {
                    enabled: logging,
                    sink: Mutex::new(log_sink),
                },
            }),
        }
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        mutate: impl FnOnce(&mut HeaderMap),
    ) -> Response {
        match self.prepare(method, url, payload, mutate) {
            Ok((request, info)) => self.dispatch(request, info),
            Err(err) => self.assembly_failure(err),
        }
    }

    /// 调度异步请求，工作线程边界上拦截 panic，保证回调仍被投递一次
    fn send_async(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        mutate: impl FnOnce(&mut HeaderMap),
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> Result<(), Error> {
        let (request, info) = self.prepare(method, url, payload, mutate)?;
        let client = self.to_owned();
        spawn("easyhttp-request", move || {
            let response = catch_unwind(AssertUnwindSafe(|| client.dispatch(request, info)))
                .unwrap_or_else(|panic| {
                    let reason = panic_reason(panic.as_ref());
                    log::error!("response pipeline panicked: {reason}");
                    Response::from_error(Error::new(
                        ErrorKind::UnknownError,
                        anyhow!("response pipeline panicked: {reason}"),
                    ))
                });
            if catch_unwind(AssertUnwindSafe(move || callback(response))).is_err() {
                log::error!("asynchronous callback panicked");
            }
        })
        .map_err(Error::from)
    }

    /// 组装请求，临时头与临时 Cookie 在此被一次性取走并清除
    fn prepare(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        mutate: impl FnOnce(&mut HeaderMap),
    ) -> Result<(ReqwestRequest, RequestInfo), Error> {
        let header_overlay = self.inner.header_overlay.lock().unwrap().take();
        let cookie_overlay = self.inner.cookie_overlay.lock().unwrap().take();

        let mut request = self
            .inner
            .http
            .request(method, url)
            .build()
            .map_err(from_reqwest_error)?;

        let mut headers = self.inner.headers.read().unwrap().to_owned();
        if let Some(overlay) = header_overlay {
            for name in overlay.keys() {
                headers.remove(name);
            }
            for (name, value) in &overlay {
                headers.append(name, value.to_owned());
            }
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CHROME_PC));
        }
        for cookie in self
            .inner
            .cookies
            .read()
            .unwrap()
            .iter()
            .chain(cookie_overlay.iter().flatten())
        {
            append_cookie(&mut headers, cookie)?;
        }
        mutate(&mut headers);

        let recorded = match payload {
            Payload::Empty => None,
            Payload::Bytes(bytes) => {
                *request.body_mut() = Some(Body::from(bytes.to_owned()));
                Some(bytes)
            }
            Payload::Multipart(multipart) => {
                let len = multipart.len();
                *request.body_mut() = Some(Body::sized(multipart, len));
                None
            }
        };
        let info = RequestInfo::new(
            request.method().to_owned(),
            request.url().to_owned(),
            headers.to_owned(),
            recorded,
        );
        *request.headers_mut() = headers;
        Ok((request, info))
    }

    fn dispatch(&self, request: ReqwestRequest, info: RequestInfo) -> Response {
        let log_fields = self.inner.log.enabled.then(|| LogFields::capture(&info));
        let start = Instant::now();
        let result = self.inner.http.execute(request).map_err(from_reqwest_error);
        let response = self.inner.response_builder.build(Some(info), result);
        if let Some(fields) = log_fields {
            if response.error().is_none() {
                self.inner
                    .log
                    .write_line(self.inner.id, start.elapsed(), &fields, response.content());
            }
        }
        response
    }

    fn assembly_failure(&self, err: Error) -> Response {
        self.inner.response_builder.build(None, Err(err))
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("headers", &self.inner.headers)
            .field("cookies", &self.inner.cookies)
            .field("response_builder", &self.inner.response_builder)
            .field("logging", &self.inner.log.enabled)
            .finish_non_exhaustive()
    }
}

fn set_content_type(value: &'static str) -> impl FnOnce(&mut HeaderMap) {
    move |headers| {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(reason) = panic.downcast_ref::<String>() {
        reason
    } else if let Some(reason) = panic.downcast_ref::<&'static str>() {
        reason
    } else {
        "unknown panic payload"
    }
}

fn append_cookie(headers: &mut HeaderMap, cookie: &Cookie) -> Result<(), Error> {
    let pair = cookie.to_string();
    let value = match headers.get(COOKIE) {
        Some(existing) => {
            let existing = existing
                .to_str()
                .map_err(|err| Error::new(ErrorKind::InvalidHeader, err))?;
            format!("{existing}; {pair}")
        }
        None => pair,
    };
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&value).map_err(|err| Error::new(ErrorKind::InvalidHeader, err))?,
    );
    Ok(())
}

struct TransactionLog {
    enabled: bool,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl TransactionLog {
    fn write_line(&self, id: usize, elapsed: Duration, fields: &LogFields, response_body: &[u8]) {
        let line = format!(
            "curl   {}\t{:?}\t#{}\t{}\t{}\theader:{}\tparams:{}\tresponse:{}\n",
            Local::now().format("%Y/%m/%d %H:%M:%S"),
            elapsed,
            id,
            fields.method,
            fields.url,
            fields.headers,
            fields.params,
            String::from_utf8_lossy(response_body),
        );
        let mut sink = self.sink.lock().unwrap();
        if let Err(err) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
            log::error!("failed to write transaction log: {err}");
        }
    }
}

struct LogFields {
    method: String,
    url: String,
    headers: String,
    params: String,
}

impl LogFields {
    fn capture(info: &RequestInfo) -> Self {
        Self {
            method: info.method().to_string(),
            url: info.url().to_string(),
            headers: headers_as_json(info.headers()),
            params: info
                .body()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_default(),
        }
    }
}

fn headers_as_json(headers: &HeaderMap) -> String {
    let mut map = BTreeMap::<&str, Vec<String>>::new();
    for (name, value) in headers {
        map.entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    serde_json::to_string(&map).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simple_cookies, DefaultResponseBuilder, MultipartBuilder};
    use bytes::Bytes;
    use futures::channel::oneshot::channel;
    use std::{
        fs::File,
        io::Result as IoResult,
        sync::{atomic::AtomicBool, mpsc},
    };
    use tokio::task::spawn_blocking;
    use warp::{
        filters::{body::bytes as body_bytes, header::headers_cloned, method::post},
        path,
        reply::Response as WarpResponse,
        Filter,
    };

    macro_rules! starts_with_server {
        ($addr:ident, $routes:ident, $code:block) => {{
            let (tx, rx) = channel();
            let ($addr, server) = warp::serve($routes).bind_with_graceful_shutdown(
                ([127, 0, 0, 1], 0),
                async move {
                    rx.await.ok();
                },
            );
            let handler = tokio::spawn(server);
            $code?;
            tx.send(()).ok();
            handler.await.ok();
        }};
    }

    #[derive(Clone, Debug, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn take_string(&self) -> String {
            String::from_utf8_lossy(&std::mem::take(&mut *self.0.lock().unwrap())).into_owned()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> IoResult<()> {
            Ok(())
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("always fails"))
        }
    }

    struct ChannelHandler(Mutex<mpsc::Sender<u16>>);

    impl ResponseHandler for ChannelHandler {
        fn on_response(&self, response: Response) {
            self.0.lock().unwrap().send(response.status_code()).ok();
        }
    }

    #[derive(Debug)]
    struct PanickingBuilder;

    impl ResponseBuilder for PanickingBuilder {
        fn build(
            &self,
            _request: Option<RequestInfo>,
            _result: Result<reqwest::blocking::Response, Error>,
        ) -> Response {
            panic!("broken response builder")
        }
    }

    #[derive(Debug)]
    struct StatusCheckingBuilder;

    impl ResponseBuilder for StatusCheckingBuilder {
        fn build(
            &self,
            request: Option<RequestInfo>,
            result: Result<reqwest::blocking::Response, Error>,
        ) -> Response {
            let mut response = DefaultResponseBuilder.build(request, result);
            if response.error().is_none() && response.status_code() >= 400 {
                let status = response.status_code();
                response.set_error(Error::new(
                    ErrorKind::InvalidRequestResponse,
                    anyhow::anyhow!("HTTP status {status}"),
                ));
            }
            response
        }
    }

    #[tokio::test]
    async fn test_sync_get_response_and_log_line() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("ping").map(|| {
            let mut response = WarpResponse::new("ok".into());
            response.headers_mut().append(
                "set-cookie",
                HeaderValue::from_static("sid=abc123; Path=/; HttpOnly"),
            );
            response
                .headers_mut()
                .append("set-cookie", HeaderValue::from_static("other=zzz"));
            response
        });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let sink = SharedSink::default();
                let client = ClientBuilder::new().log_sink(sink.to_owned()).build()?;
                let url = format!("http://{addr}/ping");

                let response = client.get(&url);
                assert!(response.error().is_none());
                assert_eq!(response.status_code(), 200);
                assert_eq!(response.content(), b"ok");
                assert_eq!(response.content_length(), 2);
                assert!(response.headers().is_some());
                assert!(response.resp().is_some());
                assert_eq!(
                    response.request().map(|info| info.method().as_str()),
                    Some("GET")
                );

                let sid = response.cookie("sid").ok_or_else(|| anyhow::anyhow!("sid cookie missing"))?;
                assert_eq!(sid.value(), "abc123");
                assert_eq!(sid.path(), Some("/"));
                assert!(sid.http_only());
                assert!(response.cookie("missing").is_none());

                let logged = sink.take_string();
                let lines = logged.lines().collect::<Vec<_>>();
                assert_eq!(lines.len(), 1);
                let line = lines[0];
                assert!(line.starts_with("curl   20"));
                assert!(line.contains("\tGET\t"));
                assert!(line.contains(&url));
                assert!(line.contains("header:{\""));
                assert!(line.contains("\tparams:\tresponse:ok"));
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_header_cookie_overlay_consumed_once() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("echo")
            .and(headers_cloned())
            .map(|headers: HeaderMap| {
                let pick = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-")
                        .to_owned()
                };
                format!(
                    "{}|{}|{}|{}",
                    pick("x-base"),
                    pick("x-extra"),
                    pick("cookie"),
                    pick("user-agent")
                )
            });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let mut persistent = HeaderMap::new();
                persistent.insert("x-base", HeaderValue::from_static("1"));
                let client = ClientBuilder::new()
                    .headers(persistent)
                    .cookies(simple_cookies([("base", "1")]))
                    .logging(false)
                    .build()?;
                let url = format!("http://{addr}/echo");

                let mut overlay = HeaderMap::new();
                overlay.insert("x-base", HeaderValue::from_static("overridden"));
                overlay.insert("x-extra", HeaderValue::from_static("2"));
                let first = client
                    .with_headers(overlay)
                    .with_cookies(simple_cookies([("extra", "2")]))
                    .get(&url);
                assert!(first.error().is_none());
                assert_eq!(
                    first.content(),
                    format!("overridden|2|base=1; extra=2|{USER_AGENT_CHROME_PC}").as_bytes()
                );

                let second = client.get(&url);
                assert!(second.error().is_none());
                assert_eq!(
                    second.content(),
                    format!("1|-|base=1|{USER_AGENT_CHROME_PC}").as_bytes()
                );

                client.set_headers(HeaderMap::new());
                client.set_cookies(Vec::new());
                let third = client.get(&url);
                assert!(third.error().is_none());
                assert_eq!(
                    third.content(),
                    format!("-|-|-|{USER_AGENT_CHROME_PC}").as_bytes()
                );
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_default_user_agent_only_when_absent() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("ua")
            .and(warp::header::value("user-agent"))
            .map(|ua: HeaderValue| ua.to_str().unwrap_or("-").to_owned());
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let client = ClientBuilder::new().logging(false).build()?;
                let url = format!("http://{addr}/ua");

                let response = client.get(&url);
                assert_eq!(response.content(), USER_AGENT_CHROME_PC.as_bytes());

                client.add_header(USER_AGENT, HeaderValue::from_static("my-agent/1.0"));
                let response = client.get(&url);
                assert_eq!(response.content(), b"my-agent/1.0");

                let mut overlay = HeaderMap::new();
                overlay.insert(USER_AGENT, HeaderValue::from_static("one-shot-agent"));
                let response = client.with_headers(overlay).get(&url);
                assert_eq!(response.content(), b"one-shot-agent");
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_post_form_encoding_and_content_type() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("take")
            .and(post())
            .and(warp::header::value(CONTENT_TYPE.as_str()))
            .and(body_bytes())
            .map(|content_type: HeaderValue, body: Bytes| {
                format!(
                    "{}|{}",
                    content_type.to_str().unwrap_or("-"),
                    String::from_utf8_lossy(&body)
                )
            });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let client = ClientBuilder::new().logging(false).build()?;
                let url = format!("http://{addr}/take");

                let response = client.post_form(&url, [("a", "b"), ("c", "d e")]);
                assert!(response.error().is_none());
                assert_eq!(
                    response.content(),
                    format!("{CONTENT_TYPE_FORM}|a=b&c=d+e").as_bytes()
                );

                let empty = client.post_form(&url, Vec::<(&str, &str)>::new());
                assert_eq!(empty.content(), format!("{CONTENT_TYPE_FORM}|").as_bytes());
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_post_json_body() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        #[derive(Serialize)]
        struct Login {
            name: String,
            code: u32,
        }

        let routes = path!("take")
            .and(post())
            .and(warp::header::value(CONTENT_TYPE.as_str()))
            .and(body_bytes())
            .map(|content_type: HeaderValue, body: Bytes| {
                format!(
                    "{}|{}",
                    content_type.to_str().unwrap_or("-"),
                    String::from_utf8_lossy(&body)
                )
            });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let client = ClientBuilder::new().logging(false).build()?;
                let url = format!("http://{addr}/take");
                let login = Login {
                    name: "admin".into(),
                    code: 42,
                };

                let response = client.post_json(&url, &login);
                assert!(response.error().is_none());
                assert_eq!(
                    response.content(),
                    format!("{CONTENT_TYPE_JSON}|{}", serde_json::to_string(&login)?).as_bytes()
                );
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_post_xml_sync_and_async_use_same_encoder() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        #[derive(Serialize)]
        #[serde(rename = "order")]
        struct Order {
            id: u32,
            name: String,
        }

        let routes = path!("take")
            .and(post())
            .and(warp::header::value(CONTENT_TYPE.as_str()))
            .and(body_bytes())
            .map(|content_type: HeaderValue, body: Bytes| {
                format!(
                    "{}|{}",
                    content_type.to_str().unwrap_or("-"),
                    String::from_utf8_lossy(&body)
                )
            });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let client = ClientBuilder::new().logging(false).build()?;
                let url = format!("http://{addr}/take");
                let order = Order {
                    id: 7,
                    name: "tea".into(),
                };
                let expected = quick_xml::se::to_string(&order)?;
                assert!(expected.starts_with("<order>"));

                let response = client.post_xml(&url, &order);
                assert!(response.error().is_none());
                assert_eq!(
                    response.content(),
                    format!("{CONTENT_TYPE_XML}|{expected}").as_bytes()
                );

                let (tx, rx) = mpsc::channel();
                client.post_xml_async(&url, &order, move |response| {
                    tx.send(response.into_content()).ok();
                })?;
                let body = rx.recv_timeout(Duration::from_secs(10))?;
                let body = String::from_utf8_lossy(&body);
                assert!(body.ends_with(&expected));
                assert!(!body.contains("{\"id\":7"));
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_post_bytes_mutator_runs_last() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("take")
            .and(post())
            .and(warp::header::value(CONTENT_TYPE.as_str()))
            .and(body_bytes())
            .map(|content_type: HeaderValue, body: Bytes| {
                format!(
                    "{}|{}",
                    content_type.to_str().unwrap_or("-"),
                    String::from_utf8_lossy(&body)
                )
            });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let client = ClientBuilder::new().logging(false).build()?;
                let url = format!("http://{addr}/take");

                let mut overlay = HeaderMap::new();
                overlay.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                let response = client.with_headers(overlay).post_bytes(
                    &url,
                    b"raw-payload".to_vec(),
                    |headers| {
                        headers.insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("application/vnd.custom"),
                        );
                    },
                );
                assert!(response.error().is_none());
                assert_eq!(response.content(), b"application/vnd.custom|raw-payload");
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_post_multipart_round_trip() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("upload")
            .and(post())
            .and(warp::header::value(CONTENT_TYPE.as_str()))
            .and(body_bytes())
            .map(|content_type: HeaderValue, body: Bytes| {
                format!(
                    "{}\n{}",
                    content_type.to_str().unwrap_or("-"),
                    String::from_utf8_lossy(&body)
                )
            });
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let tempdir = tempfile::tempdir()?;
                let file_path = tempdir.path().join("notes.txt");
                File::create(&file_path)?.write_all(b"from disk")?;

                let client = ClientBuilder::new().logging(false).build()?;
                let url = format!("http://{addr}/upload");

                let multipart = MultipartBuilder::new()
                    .add_field("city", "hangzhou")
                    .add_bytes("blob", b"mem".as_slice())
                    .add_file("notes", &file_path)
                    .build()?;
                let content_type = multipart.content_type().to_owned();
                let boundary = content_type
                    .strip_prefix("multipart/form-data; boundary=")
                    .ok_or_else(|| anyhow::anyhow!("unexpected content type"))?
                    .to_owned();

                let response = client.post_multipart(&url, multipart);
                assert!(response.error().is_none());
                let body = String::from_utf8_lossy(response.content()).into_owned();
                let (echoed_type, payload) = body
                    .split_once('\n')
                    .ok_or_else(|| anyhow::anyhow!("malformed echo"))?;
                assert_eq!(echoed_type, content_type);
                assert!(payload.contains(&format!("--{boundary}\r\n")));
                assert!(payload.contains("name=\"city\""));
                assert!(payload.contains("hangzhou"));
                assert!(payload.contains("name=\"notes\"; filename=\"notes\""));
                assert!(payload.contains("from disk"));
                assert!(payload.ends_with(&format!("--{boundary}--\r\n")));

                tempdir.close()?;
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_response_builder_flags_status_and_suppresses_log() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("missing")
            .map(|| warp::reply::with_status("gone", warp::http::StatusCode::NOT_FOUND));
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let sink = SharedSink::default();
                let client = ClientBuilder::new()
                    .response_builder(StatusCheckingBuilder)
                    .log_sink(sink.to_owned())
                    .build()?;

                let response = client.get(&format!("http://{addr}/missing"));
                let err = response
                    .error()
                    .ok_or_else(|| anyhow::anyhow!("error missing"))?;
                assert_eq!(err.kind(), ErrorKind::InvalidRequestResponse);
                assert_eq!(response.status_code(), 404);
                assert_eq!(response.content(), b"gone");
                assert!(sink.take_string().is_empty());
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }

    #[test]
    fn test_serialize_failure_sync_in_response_async_synchronous() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let sink = SharedSink::default();
        let client = ClientBuilder::new().log_sink(sink.to_owned()).build()?;

        let response = client.post_json("http://127.0.0.1:1/ignored", &Unserializable);
        let err = response.error().ok_or_else(|| anyhow::anyhow!("error missing"))?;
        assert_eq!(err.kind(), ErrorKind::SerializeError);
        assert!(response.resp().is_none());
        assert!(response.request().is_none());
        assert_eq!(response.status_code(), 0);
        assert!(response.content().is_empty());

        let response = client.post_xml("http://127.0.0.1:1/ignored", &Unserializable);
        assert_eq!(
            response.error().map(Error::kind),
            Some(ErrorKind::SerializeError)
        );

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.to_owned();
        let result = client.post_json_async("http://127.0.0.1:1/ignored", &Unserializable, move |_| {
            flag.store(true, Relaxed);
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::SerializeError);
        assert!(!invoked.load(Relaxed));

        let result = client.post_xml_async("http://127.0.0.1:1/ignored", &Unserializable, |_| {});
        assert_eq!(result.unwrap_err().kind(), ErrorKind::SerializeError);

        assert!(sink.take_string().is_empty());
        Ok(())
    }

    #[test]
    fn test_connection_refused_and_bad_url_without_log() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let sink = SharedSink::default();
        let client = ClientBuilder::new().log_sink(sink.to_owned()).build()?;

        let response = client.get("http://127.0.0.1:1/refused");
        let err = response.error().ok_or_else(|| anyhow::anyhow!("error missing"))?;
        assert_eq!(err.kind(), ErrorKind::ConnectError);
        assert_eq!(response.status_code(), 0);
        assert!(response.headers().is_none());
        assert!(response.resp().is_none());
        assert!(response.request().is_none());
        assert!(response.content().is_empty());

        let response = client.get("htt p://nope");
        assert_eq!(
            response.error().map(Error::kind),
            Some(ErrorKind::InvalidURL)
        );

        let result = client.get_async("htt p://nope", |_| {});
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidURL);

        assert!(sink.take_string().is_empty());
        Ok(())
    }

    #[test]
    fn test_async_callback_delivered_when_response_builder_panics() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let sink = SharedSink::default();
        let client = ClientBuilder::new()
            .response_builder(PanickingBuilder)
            .log_sink(sink.to_owned())
            .build()?;

        let (tx, rx) = mpsc::channel();
        client.get_async("http://127.0.0.1:1/refused", move |response| {
            tx.send(response.error().map(Error::kind)).ok();
        })?;
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(10))?,
            Some(ErrorKind::UnknownError)
        );
        assert!(sink.take_string().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_async_requests_each_logged() -> anyhow::Result<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let routes = path!("ping").map(|| "pong");
        starts_with_server!(addr, routes, {
            spawn_blocking(move || {
                let sink = SharedSink::default();
                let client = ClientBuilder::new().log_sink(sink.to_owned()).build()?;
                let url = format!("http://{addr}/ping");

                let (tx, rx) = mpsc::channel();
                for _ in 0..4 {
                    let tx = tx.clone();
                    client.get_async(&url, move |response| {
                        tx.send(response.status_code()).ok();
                    })?;
                }
                let handler = Arc::new(ChannelHandler(Mutex::new(tx)));
                for _ in 0..4 {
                    client.get_async_with_handler(&url, handler.to_owned())?;
                }
                for _ in 0..8 {
                    assert_eq!(rx.recv_timeout(Duration::from_secs(10))?, 200);
                }

                let logged = sink.take_string();
                let lines = logged.lines().collect::<Vec<_>>();
                assert_eq!(lines.len(), 8);
                for line in lines {
                    assert!(line.starts_with("curl   "));
                    assert!(line.contains("\tGET\t"));
                    assert!(line.contains("header:{\""));
                    assert!(line.ends_with("response:pong"));
                }
                Ok::<_, anyhow::Error>(())
            })
            .await?
        });
        Ok(())
    }
}
