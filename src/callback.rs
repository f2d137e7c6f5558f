use super::response::Response;

/// 异步请求回调接口
///
/// `*_async_with_handler` 系列接口通过该接口对象接收响应，
/// 是普通回调函数之外的另一种投递目标，没有额外语义。
pub trait ResponseHandler: Send + Sync {
    /// 请求完成后被调用，每次请求恰好调用一次
    fn on_response(&self, response: Response);
}
