// ==========================================
// 禁令/召回记录导入管道 - 格式识别
// ==========================================
// 职责: 将原始输入归类为 tabular / hierarchical
// 顺序: 显式提示 → 文件扩展名 → 内容描述(MIME) → 内容嗅探
// 红线: 无副作用,不解析完整内容
// ==========================================

use crate::domain::import_job::SourceDescriptor;
use crate::domain::types::SourceFormat;
use crate::importer::error::{ImportError, ImportResult};
use serde_json::Value;
use std::path::Path;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// 判定依据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionBasis {
    Hint,
    Extension,
    ContentType,
    Sniffed,
}

/// 识别结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub format: SourceFormat,
    pub basis: DetectionBasis,
    /// 由 .tsv / tsv 提示 / tab-separated-values 推出的分隔符
    pub implied_delimiter: Option<char>,
}

pub struct FormatDetector {
    sniff_prefix_bytes: usize,
}

impl FormatDetector {
    pub fn new(sniff_prefix_bytes: usize) -> Self {
        Self {
            sniff_prefix_bytes: sniff_prefix_bytes.max(1),
        }
    }

    /// 识别输入格式
    ///
    /// # 参数
    /// - content: 原始字节
    /// - source: 源描述（文件名 / 提示 / MIME）
    ///
    /// # 返回
    /// - Ok(Detection): 识别结果
    /// - Err(UnsupportedFormat): 显式提示不合法
    pub fn detect(&self, content: &[u8], source: &SourceDescriptor) -> ImportResult<Detection> {
        let implied_delimiter = implied_delimiter(source);

        // 1. 显式提示（可信,但必须合法）
        if let Some(hint) = source.format_hint.as_deref() {
            let format = SourceFormat::from_hint(hint)
                .ok_or_else(|| ImportError::UnsupportedFormat(hint.to_string()))?;
            return Ok(Detection {
                format,
                basis: DetectionBasis::Hint,
                implied_delimiter,
            });
        }

        // 2. 文件扩展名
        if let Some(format) = source.filename.as_deref().and_then(format_from_extension) {
            return Ok(Detection {
                format,
                basis: DetectionBasis::Extension,
                implied_delimiter,
            });
        }

        // 3. 内容描述
        if let Some(format) = source.content_type.as_deref().and_then(format_from_content_type)
        {
            return Ok(Detection {
                format,
                basis: DetectionBasis::ContentType,
                implied_delimiter,
            });
        }

        // 4. 内容嗅探
        Ok(Detection {
            format: self.sniff(content),
            basis: DetectionBasis::Sniffed,
            implied_delimiter,
        })
    }

    /// 嗅探有限前缀: 严格层级解析成功（或仅因截断失败）→ hierarchical,否则 tabular
    pub fn sniff(&self, content: &[u8]) -> SourceFormat {
        let body = content.strip_prefix(UTF8_BOM).unwrap_or(content);
        let start = body
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(body.len());
        let body = &body[start..];

        if !matches!(body.first(), Some(b'{') | Some(b'[')) {
            return SourceFormat::Tabular;
        }

        let end = body.len().min(self.sniff_prefix_bytes);
        let prefix = utf8_safe_prefix(&body[..end]);

        // 只看第一个 JSON 值: 完整文档 / JSON Lines 首行均可通过
        let mut values = serde_json::Deserializer::from_slice(prefix).into_iter::<Value>();
        match values.next() {
            Some(Ok(_)) => SourceFormat::Hierarchical,
            Some(Err(e)) if e.is_eof() => SourceFormat::Hierarchical,
            _ => SourceFormat::Tabular,
        }
    }
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

fn format_from_extension(filename: &str) -> Option<SourceFormat> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "csv" | "tsv" | "txt" => Some(SourceFormat::Tabular),
        "json" | "jsonl" | "ndjson" => Some(SourceFormat::Hierarchical),
        _ => None,
    }
}

fn format_from_content_type(content_type: &str) -> Option<SourceFormat> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/csv" | "text/tab-separated-values" => Some(SourceFormat::Tabular),
        "application/json" | "application/x-ndjson" | "application/jsonl" => {
            Some(SourceFormat::Hierarchical)
        }
        _ => None,
    }
}

fn implied_delimiter(source: &SourceDescriptor) -> Option<char> {
    let hint_is_tsv = source
        .format_hint
        .as_deref()
        .map(|h| h.trim().eq_ignore_ascii_case("tsv"))
        .unwrap_or(false);
    let ext_is_tsv = source
        .filename
        .as_deref()
        .and_then(|f| Path::new(f).extension().and_then(|e| e.to_str()))
        .map(|e| e.eq_ignore_ascii_case("tsv"))
        .unwrap_or(false);
    let mime_is_tsv = source
        .content_type
        .as_deref()
        .map(|c| c.to_ascii_lowercase().starts_with("text/tab-separated-values"))
        .unwrap_or(false);

    (hint_is_tsv || ext_is_tsv || mime_is_tsv).then_some('\t')
}

/// 截断处可能落在多字节字符中间,回退到合法边界
fn utf8_safe_prefix(bytes: &[u8]) -> &[u8] {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes,
        Err(e) => &bytes[..e.valid_up_to()],
    }
}
