/// 解析模型名称，提取供应商前缀和实际模型名称
#[derive(Debug, Clone)]
pub struct ParsedModel {
    pub provider_name: Option<String>,
    pub model_name: String,
}

impl ParsedModel {
    /// 从完整的模型名称中解析出供应商前缀和实际模型名称
    ///
    /// 示例：
    /// - "deepseek/deepseek-chat" -> ParsedModel { provider_name: Some("deepseek"), model_name: "deepseek-chat" }
    /// - "deepseek-chat" -> ParsedModel { provider_name: None, model_name: "deepseek-chat" }
    ///
    /// 无前缀的模型名由上层拒绝（网关要求 `provider/model` 形式）。
    pub fn parse(model: &str) -> Self {
        if let Some(slash_pos) = model.find('/') {
            let provider_name = model[..slash_pos].to_string();
            let model_name = model[slash_pos + 1..].to_string();
            Self {
                provider_name: Some(provider_name),
                model_name,
            }
        } else {
            Self {
                provider_name: None,
                model_name: model.to_string(),
            }
        }
    }

    /// 获取实际应该传递给上游 API 的模型名称
    pub fn upstream_model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_prefix() {
        let parsed = ParsedModel::parse("deepseek/deepseek-chat");
        assert_eq!(parsed.provider_name, Some("deepseek".to_string()));
        assert_eq!(parsed.model_name, "deepseek-chat");
        assert_eq!(parsed.upstream_model_name(), "deepseek-chat");
    }

    #[test]
    fn parse_without_prefix() {
        let parsed = ParsedModel::parse("deepseek-chat");
        assert_eq!(parsed.provider_name, None);
        assert_eq!(parsed.model_name, "deepseek-chat");
    }

    #[test]
    fn nested_slashes_split_on_first() {
        let parsed = ParsedModel::parse("zai/glm/4.7");
        assert_eq!(parsed.provider_name, Some("zai".to_string()));
        assert_eq!(parsed.model_name, "glm/4.7");
    }
}
