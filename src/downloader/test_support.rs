//! 测试用的 HTTP 响应器

use wiremock::{Request, Respond, ResponseTemplate};

/// 按 Range 头返回对应区间（206），没有 Range 头时返回完整内容（200）
pub(crate) struct RangeResponder(pub Vec<u8>);

impl Respond for RangeResponder {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let range = req
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
        match range {
            Some((start, end)) => {
                ResponseTemplate::new(206).set_body_bytes(self.0[start..=end].to_vec())
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.0.clone()),
        }
    }
}
