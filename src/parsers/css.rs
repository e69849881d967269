//! CSS 解析器模块
//!
//! 此模块基于 cssparser 的 token 流处理样式表，提供快照所需的三类能力：
//!
//! # 主要功能
//!
//! - **资源发现**: 找出 `@import` 目标以及 `url()` / `image-set()` 中的资源引用
//! - **@import 打包**: 递归地把已抓取的导入样式表内联到同一份文本中，
//!   未抓取的导入以占位符标记
//! - **规则序列化**: 将样式表规则序列化为紧凑文本（去除注释、折叠空白）
//!
//! # 打包格式
//!
//! 每一段样式表文本前都带有来源注释 `\n/** <url> **/\n`，导入的样式表位于
//! 导入者之前。无法解析的导入写为 `\n@@@@@<url>@@@@@`，整个资源图抓取完成后
//! 由 [`strip_unfetched_placeholders`] 清除残留的占位符。

use std::sync::LazyLock;

use cssparser::{ParseError, Parser, ParserInput, Token};
use regex::Regex;
use tracing::warn;

use crate::utils::normalize_resource_url;

/// 未抓取导入的占位符分隔符
pub const UNFETCHED_TOKEN: &str = "@@@@@";

static UNFETCHED_PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\n{0}[^\n]*?{0}", regex::escape(UNFETCHED_TOKEN)))
        .expect("valid placeholder pattern")
});

/// 以字符串参数携带资源 URL 的 CSS 函数
const URL_FUNCTIONS: &[&str] = &["url", "image-set", "-webkit-image-set"];

/// 打包结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundledCss {
    pub bundled_css: String,
    /// 打包时缓存中不存在的导入 URL（已规范化，按发现顺序去重）
    pub unfetched_resources: Vec<String>,
}

/// 导入前言无法解析
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedImport;

/// 提取样式表中引用的全部资源 URL
///
/// 包括 `@import` 目标以及 `url(...)`、`image-set(...)` 中的字符串，
/// 嵌套块（`@media`、规则体）中的引用同样会被收集。返回的 URL 保持原样，
/// 未做绝对化。
///
/// # 参数
///
/// * `css` - 样式表文本
///
/// # 返回值
///
/// 按源码顺序排列的引用列表（可能包含重复项）
pub fn extract_css_urls(css: &str) -> Vec<String> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut urls = Vec::new();

    // 解析失败时保留已收集的部分
    let _ = collect_css_urls(&mut parser, "", &mut urls);

    urls
}

fn collect_css_urls<'i, 't>(
    parser: &mut Parser<'i, 't>,
    func_name: &str,
    urls: &mut Vec<String>,
) -> Result<(), ParseError<'i, ()>> {
    let mut current_rule = String::new();

    loop {
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match token {
            Token::AtKeyword(name) => current_rule = name.to_ascii_lowercase(),
            Token::Semicolon => current_rule.clear(),
            Token::QuotedString(value) => {
                if current_rule == "import" || URL_FUNCTIONS.contains(&func_name) {
                    urls.push(value.to_string());
                }
            }
            Token::UnquotedUrl(value) => urls.push(value.to_string()),
            Token::Function(name) => {
                let name = name.to_ascii_lowercase();
                parser.parse_nested_block(|parser| collect_css_urls(parser, &name, urls))?;
            }
            Token::ParenthesisBlock | Token::SquareBracketBlock => {
                parser.parse_nested_block(|parser| collect_css_urls(parser, func_name, urls))?;
            }
            Token::CurlyBracketBlock => {
                current_rule.clear();
                parser.parse_nested_block(|parser| collect_css_urls(parser, "", urls))?;
            }
            _ => {}
        }
    }

    Ok(())
}

/// 提取顶层有效的 `@import` 目标
///
/// 与 CSSOM 一致，只有出现在其他规则之前的 `@import` 才生效。
/// 前言既不是字符串也不是 URL 时返回 [`MalformedImport`]。
pub fn extract_import_targets(css: &str) -> Result<Vec<String>, MalformedImport> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut targets = Vec::new();
    let mut seen_rule = false;

    loop {
        let token = match parser.next() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match token {
            Token::AtKeyword(ref name) if name.eq_ignore_ascii_case("import") => {
                if !seen_rule {
                    let target = parser
                        .expect_url_or_string()
                        .map_err(|_| MalformedImport)?
                        .to_string();
                    targets.push(target);
                }
                skip_statement(&mut parser);
            }
            Token::AtKeyword(ref name) if name.eq_ignore_ascii_case("charset") => {
                skip_statement(&mut parser);
            }
            Token::Semicolon | Token::CDO | Token::CDC => {}
            _ => seen_rule = true,
        }
    }

    Ok(targets)
}

fn skip_statement(parser: &mut Parser) {
    while let Ok(token) = parser.next() {
        if matches!(token, Token::Semicolon | Token::CurlyBracketBlock) {
            break;
        }
    }
}

/// 递归打包样式表
///
/// 对每条 `@import`：将目标相对于 `base_url` 规范化后查询 `lookup`，
/// 命中则以导入的 URL 为基准递归打包并**前置**到累加结果，未命中则前置占位符
/// 并记为未抓取。最后追加带来源注释的原始文本。导入链上已经出现过的 URL
/// 会被跳过以切断循环导入。
///
/// # 参数
///
/// * `css_text` - 样式表文本
/// * `base_url` - 样式表自身的 URL，同时用于来源注释
/// * `lookup` - 以规范化 URL 查询已抓取样式表文本
pub fn bundle_css<F>(css_text: &str, base_url: &str, lookup: &F) -> BundledCss
where
    F: Fn(&str) -> Option<String>,
{
    let mut chain = Vec::new();
    bundle_css_with_chain(css_text, base_url, lookup, &mut chain)
}

fn bundle_css_with_chain<F>(
    css_text: &str,
    base_url: &str,
    lookup: &F,
    chain: &mut Vec<String>,
) -> BundledCss
where
    F: Fn(&str) -> Option<String>,
{
    let mut bundled_css = String::new();
    let mut unfetched_resources: Vec<String> = Vec::new();

    chain.push(base_url.to_string());

    match extract_import_targets(css_text) {
        Ok(targets) => {
            for target in targets {
                let Some(nested_url) = normalize_resource_url(&target, base_url) else {
                    continue;
                };
                if chain.contains(&nested_url) {
                    continue;
                }

                match lookup(&nested_url) {
                    Some(nested_css) => {
                        let nested = bundle_css_with_chain(&nested_css, &nested_url, lookup, chain);
                        for url in nested.unfetched_resources {
                            if !unfetched_resources.contains(&url) {
                                unfetched_resources.push(url);
                            }
                        }
                        bundled_css = format!("{}{}", nested.bundled_css, bundled_css);
                    }
                    None => {
                        bundled_css = format!(
                            "\n{UNFETCHED_TOKEN}{nested_url}{UNFETCHED_TOKEN}{bundled_css}"
                        );
                        if !unfetched_resources.contains(&nested_url) {
                            unfetched_resources.push(nested_url);
                        }
                    }
                }
            }
        }
        Err(MalformedImport) => {
            warn!("error during css bundling, malformed @import in {}", base_url);
            bundled_css.clear();
            unfetched_resources.clear();
        }
    }

    chain.pop();

    bundled_css.push_str(&format!("\n/** {base_url} **/\n{css_text}"));

    BundledCss {
        bundled_css,
        unfetched_resources,
    }
}

/// 清除无法解析的导入占位符
pub fn strip_unfetched_placeholders(css: &str) -> String {
    UNFETCHED_PLACEHOLDER_RE.replace_all(css, "").into_owned()
}

/// 将样式表规则序列化为紧凑文本
///
/// 注释被丢弃，连续空白折叠为单个空格。样式表中没有任何规则时返回 `None`。
pub fn serialize_css_rules(css: &str) -> Option<String> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);

    let serialized = serialize_tokens(&mut parser).ok()?;
    let serialized = serialized.trim();

    if serialized.is_empty() {
        None
    } else {
        Some(serialized.to_string())
    }
}

fn serialize_tokens<'i, 't>(parser: &mut Parser<'i, 't>) -> Result<String, ParseError<'i, ()>> {
    let mut result = String::new();

    loop {
        let token_offset = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match token {
            Token::Comment(_) => {}
            Token::WhiteSpace(_) => {
                if !result.is_empty() && !result.ends_with(' ') {
                    result.push(' ');
                }
            }
            Token::ParenthesisBlock | Token::SquareBracketBlock | Token::CurlyBracketBlock => {
                let (open_char, close_char) = match token {
                    Token::ParenthesisBlock => ('(', ')'),
                    Token::SquareBracketBlock => ('[', ']'),
                    _ => ('{', '}'),
                };
                let block = parser.parse_nested_block(|parser| serialize_tokens(parser))?;
                result.push(open_char);
                result.push_str(block.trim());
                result.push(close_char);
            }
            Token::Function(name) => {
                let block = parser.parse_nested_block(|parser| serialize_tokens(parser))?;
                result.push_str(&name);
                result.push('(');
                result.push_str(block.trim());
                result.push(')');
            }
            Token::BadUrl(_) | Token::BadString(_) => {}
            _ => result.push_str(parser.slice_from(token_offset)),
        }
    }

    Ok(result)
}
