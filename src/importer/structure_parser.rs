// ==========================================
// 禁令/召回记录导入管道 - 结构解析
// ==========================================
// 职责: 已识别输入 → 有序 SourceRecord 流（惰性迭代）
// 支持: 表格 (CSV/TSV) / 层级文档 (JSON 单对象、数组、包装键) / JSON Lines
// 红线: 单条语法错误 → 单条 ParseError; 结构形态未知 → 整批失败
// 层级文档只扫描顶层边界,元素逐个解析,不构造整棵文档树
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::domain::import_job::SourceDescriptor;
use crate::domain::record::SourceRecord;
use crate::domain::types::SourceFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::format_detector::Detection;
use csv::{ReaderBuilder, StringRecordsIntoIter};
use serde_json::{Map, Value};
use std::io::Cursor;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ==========================================
// ParseOptions - 解析参数
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    pub delimiter: char,
    pub has_header: bool,
    pub wrapper_keys: Vec<String>,
}

impl ParseOptions {
    /// 合并优先级: 提交覆盖 > 格式推断(.tsv) > 配置默认
    pub fn resolve(config: &ImportConfig, source: &SourceDescriptor, detection: &Detection) -> Self {
        Self {
            delimiter: source
                .delimiter
                .or(detection.implied_delimiter)
                .unwrap_or(config.tabular_delimiter),
            has_header: source.has_header.unwrap_or(config.tabular_has_header),
            wrapper_keys: config.wrapper_keys.clone(),
        }
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        let config = ImportConfig::default();
        Self {
            delimiter: config.tabular_delimiter,
            has_header: config.tabular_has_header,
            wrapper_keys: config.wrapper_keys,
        }
    }
}

// ==========================================
// StructureParser - 结构解析器
// ==========================================
pub struct StructureParser {
    options: ParseOptions,
}

impl StructureParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    /// 打开记录流
    ///
    /// # 参数
    /// - format: 已识别格式
    /// - content: 原始字节（所有权移入流中）
    ///
    /// # 返回
    /// - Ok(RecordStream): 惰性记录流
    /// - Err: 结构形态无法确定（整批失败）
    pub fn parse(&self, format: SourceFormat, content: Vec<u8>) -> ImportResult<RecordStream> {
        match format {
            SourceFormat::Tabular => self.parse_tabular(content),
            SourceFormat::Hierarchical => self.parse_hierarchical(content),
        }
    }

    fn parse_tabular(&self, content: Vec<u8>) -> ImportResult<RecordStream> {
        let delimiter = u8::try_from(self.options.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ImportError::InvalidInput(format!(
                    "分隔符必须是单个 ASCII 字符: {:?}",
                    self.options.delimiter
                ))
            })?;

        let bom_len = if content.starts_with(UTF8_BOM) {
            UTF8_BOM.len() as u64
        } else {
            0
        };
        let mut cursor = Cursor::new(content);
        cursor.set_position(bom_len);

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(self.options.has_header)
            .flexible(true)
            .from_reader(cursor);

        let headers = if self.options.has_header {
            let header_row = reader
                .headers()
                .map_err(|e| ImportError::Structure(format!("表头读取失败: {}", e)))?;
            Some(header_row.iter().map(|h| h.trim().to_string()).collect())
        } else {
            None
        };

        Ok(RecordStream::Tabular(TabularRecords {
            rows: reader.into_records(),
            headers,
            position: 0,
        }))
    }

    /// 层级文档: 只扫描顶层结构,元素在迭代时逐个解析
    fn parse_hierarchical(&self, content: Vec<u8>) -> ImportResult<RecordStream> {
        let body_start = if content.starts_with(UTF8_BOM) {
            UTF8_BOM.len()
        } else {
            0
        };
        let start = skip_whitespace(&content, body_start);
        let first_byte = content.get(start).copied();

        match first_byte {
            Some(b'[') => {
                let close = container_end(&content, start).ok_or_else(|| {
                    ImportError::Structure("层级文档解析失败: 顶层数组未闭合".to_string())
                })?;
                ensure_document_end(&content, close + 1)?;
                Ok(RecordStream::Document(DocumentRecords::new(
                    content,
                    start + 1,
                    close,
                )))
            }
            Some(b'{') => match container_end(&content, start) {
                Some(close) if skip_whitespace(&content, close + 1) == content.len() => {
                    self.split_object(content, start, close)
                }
                // 顶层对象之后仍有内容（或首个对象未闭合）: 按 JSON Lines 处理
                _ => json_lines(content, body_start),
            },
            _ => match serde_json::from_slice::<Value>(&content[body_start..]) {
                Ok(other) => Err(ImportError::Format(format!(
                    "顶层必须是对象或数组，实际: {}",
                    json_type_name(&other)
                ))),
                Err(e) => Err(ImportError::Structure(format!("层级文档解析失败: {}", e))),
            },
        }
    }

    /// 顶层对象: 包装键数组 / 未知包装键 / 单条记录
    fn split_object(&self, content: Vec<u8>, open: usize, close: usize) -> ImportResult<RecordStream> {
        let members = object_members(&content, open, close)?;

        for key in &self.options.wrapper_keys {
            let wrapped = members
                .iter()
                .find(|m| &m.key == key && content.get(m.value_start) == Some(&b'['));
            if let Some(member) = wrapped {
                let array_close = container_end(&content, member.value_start)
                    .filter(|end| *end < member.value_end)
                    .ok_or_else(|| {
                        ImportError::Structure(format!("包装键 {} 的数组未闭合", key))
                    })?;
                let first = member.value_start + 1;
                return Ok(RecordStream::Document(DocumentRecords::new(
                    content,
                    first,
                    array_close,
                )));
            }
        }

        // 单键且值为数组: 形似包装但键未知,无法判定记录边界
        if let [only] = members.as_slice() {
            if content.get(only.value_start) == Some(&b'[') {
                return Err(ImportError::Format(format!(
                    "无法识别的包装键: {}（支持: {}）",
                    only.key,
                    self.options.wrapper_keys.join(", ")
                )));
            }
        }

        // 单条记录: 整个对象是唯一元素
        Ok(RecordStream::Document(DocumentRecords::new(
            content,
            open,
            close + 1,
        )))
    }
}

/// 首个非空行是对象 → JSON Lines; 否则形态无法确定
fn json_lines(content: Vec<u8>, body_start: usize) -> ImportResult<RecordStream> {
    let first_line = content[body_start..]
        .split(|b| *b == b'\n')
        .map(trim_ascii)
        .find(|line| !line.is_empty());
    match first_line.map(serde_json::from_slice::<Value>) {
        Some(Ok(Value::Object(_))) => Ok(RecordStream::Lines(JsonLinesRecords {
            content,
            offset: body_start,
            position: 0,
        })),
        Some(Err(e)) => Err(ImportError::Structure(format!("层级文档解析失败: {}", e))),
        _ => Err(ImportError::Structure(
            "层级文档解析失败: 顶层对象之后存在多余内容".to_string(),
        )),
    }
}

fn ensure_document_end(content: &[u8], from: usize) -> ImportResult<()> {
    let rest = skip_whitespace(content, from);
    if rest == content.len() {
        Ok(())
    } else {
        Err(ImportError::Structure(format!(
            "层级文档解析失败: 顶层值之后存在多余内容（偏移 {}）",
            rest
        )))
    }
}

// ==========================================
// RecordStream - 记录流（封闭变体）
// ==========================================
pub enum RecordStream {
    Tabular(TabularRecords),
    Document(DocumentRecords),
    Lines(JsonLinesRecords),
}

impl RecordStream {
    /// 预知记录总数（仅层级文档）
    pub fn total_items(&self) -> Option<u64> {
        match self {
            RecordStream::Document(records) => Some(records.total as u64),
            RecordStream::Tabular(_) | RecordStream::Lines(_) => None,
        }
    }
}

impl Iterator for RecordStream {
    type Item = ImportResult<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RecordStream::Tabular(records) => records.next(),
            RecordStream::Document(records) => records.next(),
            RecordStream::Lines(records) => records.next(),
        }
    }
}

// ==========================================
// 表格记录迭代器
// ==========================================
pub struct TabularRecords {
    rows: StringRecordsIntoIter<Cursor<Vec<u8>>>,
    headers: Option<Vec<String>>,
    position: usize,
}

impl Iterator for TabularRecords {
    type Item = ImportResult<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => {
                    let position = self.position;
                    self.position += 1;
                    return Some(Err(ImportError::Parse {
                        position,
                        message: e.to_string(),
                    }));
                }
            };

            // 跳过完全空白的行
            if row.iter().all(|v| v.trim().is_empty()) {
                continue;
            }

            let headers = self.headers.get_or_insert_with(|| {
                (1..=row.len()).map(|i| format!("column_{}", i)).collect()
            });

            let mut warnings = Vec::new();
            if row.len() != headers.len() {
                warnings.push(format!(
                    "列数不一致: 期望 {} 实际 {}",
                    headers.len(),
                    row.len()
                ));
            }

            let fields = headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    let value = row.get(idx).map(str::trim).unwrap_or_default();
                    (header.clone(), Value::String(value.to_string()))
                })
                .collect();

            let mut record = SourceRecord::new(self.position, fields);
            record.warnings = warnings;
            self.position += 1;
            return Some(Ok(record));
        }
    }
}

// ==========================================
// 层级文档记录迭代器（按元素边界逐个解析）
// ==========================================
pub struct DocumentRecords {
    content: Vec<u8>,
    elements: ElementSpans,
    position: usize,
    total: usize,
}

impl DocumentRecords {
    /// # 参数
    /// - start / end: 元素区间（数组括号内侧,或单个对象本身）
    fn new(content: Vec<u8>, start: usize, end: usize) -> Self {
        let elements = ElementSpans { offset: start, end };
        let total = elements.clone().count_in(&content);
        Self {
            content,
            elements,
            position: 0,
            total,
        }
    }
}

impl Iterator for DocumentRecords {
    type Item = ImportResult<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, end) = self.elements.next_in(&self.content)?;
        let position = self.position;
        self.position += 1;

        let slice = trim_ascii(&self.content[start..end]);
        if slice.is_empty() {
            return Some(Err(ImportError::Parse {
                position,
                message: "数组元素为空".to_string(),
            }));
        }
        Some(match serde_json::from_slice::<Value>(slice) {
            Ok(value) => object_to_record(position, value),
            Err(e) => Err(ImportError::Parse {
                position,
                message: format!("数组元素解析失败: {}", e),
            }),
        })
    }
}

/// 顶层逗号分隔的元素区间游标
#[derive(Debug, Clone)]
struct ElementSpans {
    offset: usize,
    end: usize,
}

impl ElementSpans {
    fn next_in(&mut self, content: &[u8]) -> Option<(usize, usize)> {
        let start = skip_whitespace(content, self.offset).min(self.end);
        if start >= self.end {
            return None;
        }
        let stop = scan_until_separator(content, start, self.end);
        // 跳过分隔符; 末尾逗号之后没有元素
        self.offset = stop + 1;
        Some((start, stop))
    }

    fn count_in(mut self, content: &[u8]) -> usize {
        let mut count = 0;
        while self.next_in(content).is_some() {
            count += 1;
        }
        count
    }
}

// ==========================================
// 顶层结构扫描（字符串/转义感知,不构造值）
// ==========================================

/// 扫描到深度 0 的逗号或区间末尾
fn scan_until_separator(content: &[u8], start: usize, end: usize) -> usize {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut idx = start;
    while idx < end {
        let byte = content[idx];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else {
            match byte {
                b'"' => in_string = true,
                b'[' | b'{' => depth += 1,
                b']' | b'}' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => return idx,
                _ => {}
            }
        }
        idx += 1;
    }
    end
}

/// 返回与 open 处括号配对的闭括号位置; 未闭合返回 None
fn container_end(content: &[u8], open: usize) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, byte) in content.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// 顶层对象成员: 键 + 值区间
struct ObjectMember {
    key: String,
    value_start: usize,
    value_end: usize,
}

/// 拆分顶层对象成员（只解析键,值保持未解析）
fn object_members(content: &[u8], open: usize, close: usize) -> ImportResult<Vec<ObjectMember>> {
    let mut members = Vec::new();
    let mut spans = ElementSpans {
        offset: open + 1,
        end: close,
    };
    while let Some((start, end)) = spans.next_in(content) {
        let colon = scan_key_end(content, start, end).ok_or_else(|| {
            ImportError::Structure(format!("层级文档解析失败: 偏移 {} 处对象成员缺少键", start))
        })?;
        let key = serde_json::from_slice::<String>(trim_ascii(&content[start..colon]))
            .map_err(|e| ImportError::Structure(format!("层级文档解析失败: 对象键无效: {}", e)))?;
        members.push(ObjectMember {
            key,
            value_start: skip_whitespace(content, colon + 1).min(end),
            value_end: end,
        });
    }
    Ok(members)
}

/// 键字符串之后的冒号位置
fn scan_key_end(content: &[u8], start: usize, end: usize) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (idx, byte) in content.iter().enumerate().take(end).skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
        } else if *byte == b'"' {
            in_string = true;
        } else if *byte == b':' {
            return Some(idx);
        }
    }
    None
}

fn skip_whitespace(content: &[u8], from: usize) -> usize {
    content[from.min(content.len())..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(content.len(), |offset| from + offset)
}

// ==========================================
// JSON Lines 记录迭代器
// ==========================================
pub struct JsonLinesRecords {
    content: Vec<u8>,
    offset: usize,
    position: usize,
}

impl Iterator for JsonLinesRecords {
    type Item = ImportResult<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.content.len() {
            let rest = &self.content[self.offset..];
            let line_len = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
            let line = trim_ascii(&rest[..line_len]);
            self.offset += line_len + 1;

            if line.is_empty() {
                continue;
            }

            let position = self.position;
            self.position += 1;
            return Some(match serde_json::from_slice::<Value>(line) {
                Ok(value) => object_to_record(position, value),
                Err(e) => Err(ImportError::Parse {
                    position,
                    message: format!("JSON 行解析失败: {}", e),
                }),
            });
        }
        None
    }
}

fn object_to_record(position: usize, value: Value) -> ImportResult<SourceRecord> {
    match value {
        Value::Object(map) => Ok(SourceRecord::new(position, into_fields(map))),
        other => Err(ImportError::Parse {
            position,
            message: format!("记录必须是对象，实际: {}", json_type_name(&other)),
        }),
    }
}

fn into_fields(map: Map<String, Value>) -> Vec<(String, Value)> {
    map.into_iter().collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end.max(start)]
}
