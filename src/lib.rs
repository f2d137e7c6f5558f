#![deny(
    single_use_lifetimes,
    missing_debug_implementations,
    large_assignments,
    exported_private_dependencies,
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_docs,
    non_ascii_idents,
    indirect_structural_match,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_code,
    unused_crate_dependencies,
    unused_extern_crates,
    unused_import_braces,
    unused_lifetimes,
    unused_qualifications
)]

//! # easyhttp
//!
//! ## 便捷的阻塞式 HTTP 客户端封装
//!
//! 在 reqwest 阻塞客户端之上提供一层便捷封装。链式构建器负责连接层配置
//! （超时、代理、客户端证书、附加根证书、Cookie、重定向策略、日志输出），
//! 客户端以同步或回调异步的方式发起 GET / 表单 / JSON / XML / 字节 / Multipart
//! 请求，响应统一通过 [`Response`] 读取，每次成功的请求输出一行事务日志。
//!
//! ### 代码示例
//!
//! ```no_run
//! use easyhttp::{url_with_query, ClientBuilder};
//!
//! # fn main() -> Result<(), easyhttp::BuildError> {
//! let client = ClientBuilder::new().build()?;
//! let response = client.get(&url_with_query("http://127.0.0.1:8080/search", [("q", "rust")]));
//! if response.error().is_none() {
//!     println!("{}", String::from_utf8_lossy(response.content()));
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod callback;
mod client;
mod cookie;
mod error;
mod multipart;
mod response;
mod spawn;

pub use builder::{ClientBuilder, TlsIdentity};
pub use callback::ResponseHandler;
pub use client::Client;
pub use cookie::Cookie;
pub use error::{BuildError, BuildResult, Error, ErrorKind};
pub use multipart::{Multipart, MultipartBuilder};
pub use response::{
    DefaultResponseBuilder, RequestInfo, Response, ResponseBuilder, ResponseParts,
};

pub use reqwest;

use form_urlencoded::Serializer;

/// 默认的桌面版 Chrome User-Agent
///
/// 请求组装时若没有任何 User-Agent，自动使用该值。
pub const USER_AGENT_CHROME_PC: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.132 Safari/537.36";

/// 表单请求的 Content-Type
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// JSON 请求的 Content-Type
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// XML 请求的 Content-Type
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// 以平铺的名值映射构造简单 Cookie 列表
///
/// 只设置名称与值，不设置任何属性。
pub fn simple_cookies<I, K, V>(pairs: I) -> Vec<Cookie>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(Cookie::from).collect()
}

/// 把查询参数追加到 URL 上
///
/// 参数按 URL 编码规则转义。URL 为空或参数为空时原样返回 URL。
///
/// ### 代码示例
///
/// ```
/// use easyhttp::url_with_query;
///
/// assert_eq!(url_with_query("http://x", [("a", "b")]), "http://x?a=b");
/// ```
pub fn url_with_query<I, K, V>(url: &str, pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let query = encode_form(pairs);
    if url.is_empty() || query.is_empty() {
        url.to_owned()
    } else {
        format!("{url}?{query}")
    }
}

/// 把平铺的名值映射编码为 URL 编码的表单体
///
/// [`Client::post_form`] 使用同样的编码。
pub fn encode_form<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name.as_ref(), value.as_ref());
    }
    serializer.finish()
}
