use super::error::{BuildError, BuildResult};
use assert_impl::assert_impl;
use mime::Mime;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::random;
use regex::Regex;
use std::{
    fs,
    io::{Cursor, Read, Result as IoResult},
    path::PathBuf,
};

/// Multipart 字段内容
#[derive(Debug, Clone)]
enum FieldSource {
    FilePath(PathBuf),
    Text(String),
    Bytes(Vec<u8>),
}

/// Multipart 表单构建器
///
/// 以名称注册文件、表单值或内存数据三种字段，同名字段后注册的生效。
/// 字段按注册顺序编码。
///
/// ### 代码示例
///
/// ```
/// use easyhttp::MultipartBuilder;
///
/// # fn example() -> Result<(), easyhttp::BuildError> {
/// let multipart = MultipartBuilder::new()
///     .add_field("scene", "avatar")
///     .add_bytes("thumb", vec![0u8; 16])
///     .add_file("portrait", "/tmp/portrait.png")
///     .build()?;
/// assert!(multipart.content_type().starts_with("multipart/form-data; boundary="));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MultipartBuilder {
    boundary: String,
    fields: Vec<(String, FieldSource)>,
}

impl Default for MultipartBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    /// 创建 Multipart 表单构建器
    #[inline]
    pub fn new() -> Self {
        Self {
            boundary: gen_boundary(),
            fields: Default::default(),
        }
    }

    /// 添加文件字段，构建时从磁盘读取
    ///
    /// 编码时以 `name` 同时作为字段名和文件名。
    #[inline]
    #[must_use]
    pub fn add_file(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.put(name.into(), FieldSource::FilePath(path.into()))
    }

    /// 添加表单值字段
    #[inline]
    #[must_use]
    pub fn add_field(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(name.into(), FieldSource::Text(value.into()))
    }

    /// 以平铺映射的形式批量添加表单值字段
    #[inline]
    #[must_use]
    pub fn add_fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in fields {
            self = self.add_field(name, value);
        }
        self
    }

    /// 添加内存数据字段
    ///
    /// 编码方式与文件字段相同，数据来自内存而非磁盘。
    #[inline]
    #[must_use]
    pub fn add_bytes(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.put(name.into(), FieldSource::Bytes(bytes.into()))
    }

    fn put(mut self, name: String, source: FieldSource) -> Self {
        if let Some((_, existing)) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            *existing = source;
        } else {
            self.fields.push((name, source));
        }
        self
    }

    /// 编码为 Multipart 表单
    ///
    /// 按注册顺序编码所有字段并写入结束分隔符。任何一个文件字段读取失败都会
    /// 中止整个构建并返回错误，错误中带有出错的文件路径。
    pub fn build(self) -> BuildResult<Multipart> {
        let mut buf = Vec::new();
        for (name, source) in &self.fields {
            buf.extend_from_slice(b"--");
            buf.extend_from_slice(self.boundary.as_bytes());
            buf.extend_from_slice(b"\r\n");
            match source {
                FieldSource::FilePath(path) => {
                    let content = fs::read(path).map_err(|err| BuildError::MultipartFile {
                        path: path.to_owned(),
                        source: err,
                    })?;
                    let mime = mime_guess::from_path(path).first_or_octet_stream();
                    buf.extend_from_slice(&encode_headers(name, Some(name), Some(&mime)));
                    buf.extend_from_slice(b"\r\n\r\n");
                    buf.extend_from_slice(&content);
                }
                FieldSource::Text(value) => {
                    buf.extend_from_slice(&encode_headers(name, None, None));
                    buf.extend_from_slice(b"\r\n\r\n");
                    buf.extend_from_slice(value.as_bytes());
                }
                FieldSource::Bytes(bytes) => {
                    buf.extend_from_slice(&encode_headers(
                        name,
                        Some(name),
                        Some(&mime::APPLICATION_OCTET_STREAM),
                    ));
                    buf.extend_from_slice(b"\r\n\r\n");
                    buf.extend_from_slice(bytes);
                }
            }
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"--");
        buf.extend_from_slice(self.boundary.as_bytes());
        buf.extend_from_slice(b"--\r\n");

        Ok(Multipart {
            content_type: format!("multipart/form-data; boundary={}", self.boundary),
            body: Cursor::new(buf),
        })
    }
}

/// 编码完成的 Multipart 表单
///
/// 作为一次性的输入流被 [`Client::post_multipart`](crate::Client::post_multipart)
/// 消费，Content-Type 中带有本次随机生成的分隔符。
#[derive(Debug, Clone)]
pub struct Multipart {
    content_type: String,
    body: Cursor<Vec<u8>>,
}

impl Multipart {
    /// 获取带分隔符的 `multipart/form-data` Content-Type
    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// 获取编码后的表单字节数
    #[inline]
    pub fn len(&self) -> u64 {
        self.body.get_ref().len() as u64
    }

    /// 表单内容是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.get_ref().is_empty()
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl Read for Multipart {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.body.read(buf)
    }
}

fn gen_boundary() -> String {
    use std::fmt::Write;

    let mut b = String::with_capacity(32);
    write!(b, "{:016x}{:016x}", random::<u64>(), random::<u64>()).unwrap();
    b
}

fn encode_headers(name: &str, file_name: Option<&str>, content_type: Option<&Mime>) -> Vec<u8> {
    let mut buf = Vec::from(b"content-disposition: form-data; ".as_slice());
    buf.extend_from_slice(format_parameter("name", name).as_bytes());
    if let Some(file_name) = file_name {
        buf.extend_from_slice(b"; ");
        buf.extend_from_slice(format_file_name(file_name).as_bytes());
    }
    if let Some(content_type) = content_type {
        buf.extend_from_slice(b"\r\ncontent-type: ");
        buf.extend_from_slice(content_type.as_ref().as_bytes());
    }
    buf
}

fn format_file_name(file_name: &str) -> String {
    static REGEX: Lazy<Regex> = Lazy::new(|| Regex::new("\\\\|\"|\r|\n").unwrap());
    let mut formatted = String::from("filename=\"");
    let mut last_match = 0;
    for m in REGEX.find_iter(file_name) {
        let begin = m.start();
        let end = m.end();
        formatted.push_str(&file_name[last_match..begin]);
        match &file_name[begin..end] {
            "\\" => formatted.push_str("\\\\"),
            "\"" => formatted.push_str("\\\""),
            "\r" => formatted.push_str("\\\r"),
            "\n" => formatted.push_str("\\\n"),
            _ => unreachable!(),
        }
        last_match = end;
    }
    formatted.push_str(&file_name[last_match..]);
    formatted.push('"');
    formatted
}

const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

fn format_parameter(name: &str, value: &str) -> String {
    let legal_value = utf8_percent_encode(value, PATH_SEGMENT_ENCODE_SET).to_string();
    let mut formatted = String::from(name);
    if value.len() == legal_value.len() {
        formatted.push_str("=\"");
        formatted.push_str(value);
        formatted.push('"');
    } else {
        formatted.push_str("*=utf-8''");
        formatted.push_str(&legal_value);
    }
    formatted
}
