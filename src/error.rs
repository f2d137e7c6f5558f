use anyhow::Error as AnyError;
use assert_impl::assert_impl;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;
use std::{
    error::Error as StdError,
    fmt,
    io::Error as IoError,
    path::PathBuf,
    result::Result as StdResult,
};
use thiserror::Error as ThisError;

/// 客户端构建错误
///
/// 由 [`ClientBuilder::build`](crate::ClientBuilder::build) 以及
/// [`MultipartBuilder::build`](crate::MultipartBuilder::build) 同步返回。
#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// 代理 URL 非法
    #[error("Invalid proxy url {url:?}: {source}")]
    InvalidProxyUrl {
        /// 非法的代理 URL
        url: String,
        /// 底层解析错误
        #[source]
        source: ReqwestError,
    },

    /// 证书文件读取失败
    #[error("Read certificate file {path:?} error: {source}")]
    CertificateFile {
        /// 读取失败的文件路径
        path: PathBuf,
        /// 底层 IO 错误
        #[source]
        source: IoError,
    },

    /// 证书文件内容解析失败
    #[error("Parse certificate file {path:?} error: {source}")]
    CertificateParse {
        /// 解析失败的文件路径
        path: PathBuf,
        /// 底层解析错误
        #[source]
        source: ReqwestError,
    },

    /// Multipart 文件字段读取失败
    #[error("Read multipart file {path:?} error: {source}")]
    MultipartFile {
        /// 读取失败的文件路径
        path: PathBuf,
        /// 底层 IO 错误
        #[source]
        source: IoError,
    },

    /// 传输层客户端构建失败
    #[error("Build transport client error: {0}")]
    Transport(#[from] ReqwestError),
}

/// 客户端构建结果
pub type BuildResult<T> = StdResult<T, BuildError>;

/// HTTP 请求错误类型
///
/// 传输层只能区分其中的一部分，其余类型留给自定义响应构造策略归类错误时使用。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 非法的请求 / 响应错误
    InvalidRequestResponse,

    /// 非法的 URL
    InvalidURL,

    /// 非法的 HTTP 头
    InvalidHeader,

    /// 网络连接失败
    ConnectError,

    /// 代理连接失败
    ProxyError,

    /// 发送失败
    SendError,

    /// 接受响应体失败
    ReceiveError,

    /// 请求体序列化失败
    SerializeError,

    /// 本地 IO 失败
    LocalIOError,

    /// 超时失败
    TimeoutError,

    /// SSL 错误
    SSLError,

    /// 重定向次数过多
    TooManyRedirect,

    /// 未知错误
    UnknownError,
}

/// HTTP 请求错误
///
/// 请求发出后产生的错误总是通过 [`Response::error`](crate::Response::error)
/// 返回，发出前可检查出的错误由异步接口同步返回。
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: AnyError,
}

impl Error {
    /// 创建 HTTP 请求错误
    #[inline]
    pub fn new(kind: ErrorKind, err: impl Into<AnyError>) -> Self {
        Error {
            kind,
            error: err.into(),
        }
    }

    /// 获取 HTTP 请求错误类型
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 转换为内部错误
    #[inline]
    pub fn into_inner(self) -> AnyError {
        self.error
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.error)
    }
}

impl StdError for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.error.as_ref())
    }
}

impl From<JsonError> for Error {
    #[inline]
    fn from(error: JsonError) -> Self {
        Self::new(ErrorKind::SerializeError, error)
    }
}

impl From<IoError> for Error {
    #[inline]
    fn from(error: IoError) -> Self {
        Self::new(ErrorKind::LocalIOError, error)
    }
}

pub(crate) fn from_reqwest_error(err: ReqwestError) -> Error {
    if err.is_builder() {
        Error::new(ErrorKind::InvalidURL, err)
    } else if err.is_timeout() {
        Error::new(ErrorKind::TimeoutError, err)
    } else if err.is_connect() {
        Error::new(ErrorKind::ConnectError, err)
    } else if err.is_redirect() {
        Error::new(ErrorKind::TooManyRedirect, err)
    } else if err.is_request() {
        Error::new(ErrorKind::InvalidRequestResponse, err)
    } else {
        Error::new(ErrorKind::UnknownError, err)
    }
}
