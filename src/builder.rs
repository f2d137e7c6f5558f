use super::{
    client::Client,
    cookie::Cookie,
    error::{BuildError, BuildResult},
    response::{DefaultResponseBuilder, ResponseBuilder},
};
use reqwest::{
    blocking::ClientBuilder as ReqwestClientBuilder, header::HeaderMap, redirect::Policy,
    Certificate, Identity, Proxy,
};
use std::{
    fmt, fs,
    io::{stdout, Write},
    path::{Path, PathBuf},
    time::Duration,
};

/// PEM 格式的客户端证书与私钥文件路径对
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    cert_file: PathBuf,
    key_file: PathBuf,
}

impl TlsIdentity {
    /// 创建客户端证书对
    #[inline]
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// 获取证书文件路径
    #[inline]
    pub fn cert_file(&self) -> &PathBuf {
        &self.cert_file
    }

    /// 获取私钥文件路径
    #[inline]
    pub fn key_file(&self) -> &PathBuf {
        &self.key_file
    }
}

/// HTTP 客户端构建器
///
/// 所有连接层设置在 [`build`](ClientBuilder::build) 时一次性冻结，
/// 之后不可更改。校验按固定顺序进行，遇到第一个错误即返回。
///
/// ### 代码示例
///
/// ```
/// use easyhttp::ClientBuilder;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), easyhttp::BuildError> {
/// let client = ClientBuilder::new()
///     .timeout(Duration::from_secs(10))
///     .logging(false)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    timeout: Option<Duration>,
    proxy_url: Option<String>,
    tls_identities: Vec<TlsIdentity>,
    trusted_cas: Vec<PathBuf>,
    skip_verify: bool,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    redirect_policy: Option<Policy>,
    cookie_jar: bool,
    response_builder: Box<dyn ResponseBuilder>,
    log_sink: Box<dyn Write + Send>,
    logging: bool,
}

impl Default for ClientBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// 创建 HTTP 客户端构建器
    #[inline]
    pub fn new() -> Self {
        Self {
            timeout: None,
            proxy_url: None,
            tls_identities: Default::default(),
            trusted_cas: Default::default(),
            skip_verify: true,
            headers: Default::default(),
            cookies: Default::default(),
            redirect_policy: None,
            cookie_jar: false,
            response_builder: Box::new(DefaultResponseBuilder),
            log_sink: Box::new(stdout()),
            logging: true,
        }
    }

    /// 设置请求超时时长
    ///
    /// 覆盖从建立连接到读完响应体的全过程。默认不限时。
    #[inline]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 设置代理服务器 URL
    ///
    /// 对所有协议生效。URL 会在 [`build`](ClientBuilder::build) 时解析。
    #[inline]
    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    /// 设置客户端证书对列表
    ///
    /// 证书与私钥文件均为 PEM 格式，在 [`build`](ClientBuilder::build) 时读取并解析。
    /// 传输层只支持单个客户端证书，列表中靠后的证书生效。
    #[inline]
    pub fn tls_identities(mut self, identities: Vec<TlsIdentity>) -> Self {
        self.tls_identities = identities;
        self
    }

    /// 设置附加的根证书文件列表
    ///
    /// PEM 格式，在 [`build`](ClientBuilder::build) 时读取并解析，追加到系统根证书之后。
    #[inline]
    pub fn trusted_cas(mut self, cas: Vec<PathBuf>) -> Self {
        self.trusted_cas = cas;
        self
    }

    /// 是否跳过服务端证书校验
    ///
    /// 默认为 `true`，即不校验服务端证书。
    #[inline]
    pub fn skip_verify(mut self, skip_verify: bool) -> Self {
        self.skip_verify = skip_verify;
        self
    }

    /// 设置持久 HTTP 头
    ///
    /// 附着在该客户端之后发出的每一个请求上。
    #[inline]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// 设置持久 Cookie 列表
    ///
    /// 附着在该客户端之后发出的每一个请求上。
    #[inline]
    pub fn cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    /// 设置重定向策略
    ///
    /// 默认跟随最多十次重定向。
    #[inline]
    pub fn redirect_policy(mut self, policy: Policy) -> Self {
        self.redirect_policy = Some(policy);
        self
    }

    /// 启用内存 Cookie 自动管理
    ///
    /// 响应中的 `Set-Cookie` 会被记录并在后续请求中自动回送。默认关闭。
    #[inline]
    pub fn enable_cookie_jar(mut self) -> Self {
        self.cookie_jar = true;
        self
    }

    /// 设置响应构造策略
    ///
    /// 默认为 [`DefaultResponseBuilder`]。
    #[inline]
    pub fn response_builder(mut self, response_builder: impl ResponseBuilder + 'static) -> Self {
        self.response_builder = Box::new(response_builder);
        self
    }

    /// 设置请求日志输出目标
    ///
    /// 默认输出到标准输出。
    #[inline]
    pub fn log_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.log_sink = Box::new(sink);
        self
    }

    /// 是否输出请求日志
    ///
    /// 默认开启。
    #[inline]
    pub fn logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// 构建 HTTP 客户端
    ///
    /// 依次校验代理 URL、客户端证书对、附加根证书，再组装传输层客户端，
    /// 返回第一个遇到的错误。
    pub fn build(self) -> BuildResult<Client> {
        let proxy = self
            .proxy_url
            .as_ref()
            .map(|url| {
                Proxy::all(url).map_err(|err| BuildError::InvalidProxyUrl {
                    url: url.to_owned(),
                    source: err,
                })
            })
            .transpose()?;
        let identities = self
            .tls_identities
            .iter()
            .map(load_identity)
            .collect::<BuildResult<Vec<_>>>()?;
        let trusted_cas = self
            .trusted_cas
            .iter()
            .map(|path| load_certificate(path))
            .collect::<BuildResult<Vec<_>>>()?;

        let mut http = ReqwestClientBuilder::new()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.skip_verify);
        if let Some(proxy) = proxy {
            http = http.proxy(proxy);
        }
        for identity in identities {
            http = http.identity(identity);
        }
        for ca in trusted_cas {
            http = http.add_root_certificate(ca);
        }
        if let Some(policy) = self.redirect_policy {
            http = http.redirect(policy);
        }
        if self.cookie_jar {
            http = http.cookie_store(true);
        }
        let http = http.build()?;

        Ok(Client::from_build(
            http,
            self.headers,
            self.cookies,
            self.response_builder,
            self.log_sink,
            self.logging,
        ))
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("timeout", &self.timeout)
            .field("proxy_url", &self.proxy_url)
            .field("tls_identities", &self.tls_identities)
            .field("trusted_cas", &self.trusted_cas)
            .field("skip_verify", &self.skip_verify)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("redirect_policy", &self.redirect_policy)
            .field("cookie_jar", &self.cookie_jar)
            .field("response_builder", &self.response_builder)
            .field("logging", &self.logging)
            .finish_non_exhaustive()
    }
}

fn load_identity(identity: &TlsIdentity) -> BuildResult<Identity> {
    let cert = fs::read(identity.cert_file()).map_err(|err| BuildError::CertificateFile {
        path: identity.cert_file().to_owned(),
        source: err,
    })?;
    let key = fs::read(identity.key_file()).map_err(|err| BuildError::CertificateFile {
        path: identity.key_file().to_owned(),
        source: err,
    })?;
    Identity::from_pkcs8_pem(&cert, &key).map_err(|err| BuildError::CertificateParse {
        path: identity.cert_file().to_owned(),
        source: err,
    })
}

fn load_certificate(path: &Path) -> BuildResult<Certificate> {
    let pem = fs::read(path).map_err(|err| BuildError::CertificateFile {
        path: path.to_owned(),
        source: err,
    })?;
    Certificate::from_pem(&pem).map_err(|err| BuildError::CertificateParse {
        path: path.to_owned(),
        source: err,
    })
}
