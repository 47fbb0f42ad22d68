//! 硬编码拦截模式：确定性，不咨询模型，调用时不可关闭
//!
//! 内置模式覆盖递归删除根/家目录、裸设备写入、格式化、fork bomb 等；配置中的 extra_patterns 只能追加。

use regex::Regex;

use crate::core::AgentError;

/// 磁盘设备名前缀
const DISK: &str = r"/dev/(?:sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d|r?disk\d)";
/// 函数定义（`name() {` 或 `function name {`）及其函数体
const FUNCTION_DEF: &str = r"(?:\bfunction\s+([a-z_:.][a-z0-9_:.]*)\s*(?:\(\s*\))?|([a-z_:.][a-z0-9_:.]*)\s*\(\s*\))\s*\{([^}]*)\}";
/// 命令前可以出现的包装命令
const WRAPPERS: &[&str] = &["sudo", "doas", "command", "exec", "nohup", "time", "env", "nice", "xargs"];

fn builtin_patterns() -> Vec<(String, &'static str)> {
    vec![
        (r"\bmkfs(?:\.[a-z0-9]+)?\b".to_string(), "filesystem formatting"),
        (r"\bwipefs\b".to_string(), "filesystem signature wipe"),
        (format!(r"\bdd\b[^;&|]*\bof={DISK}"), "raw write to a disk device"),
        (format!(r">\s*{DISK}"), "redirection into a disk device"),
        (format!(r"\bshred\b[^;&|]*{DISK}"), "shredding a disk device"),
    ]
}

/// 编译后的模式集合
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<(Regex, String)>,
    function_def: Regex,
}

impl PatternSet {
    /// 内置模式 + 追加模式；追加模式非法时返回 Config 错误
    pub fn new(extra_patterns: &[String]) -> Result<Self, AgentError> {
        let mut patterns = Vec::new();
        for (src, reason) in builtin_patterns() {
            patterns.push((compile(&src)?, reason.to_string()));
        }
        for src in extra_patterns {
            patterns.push((compile(src)?, format!("matches configured pattern `{src}`")));
        }
        let function_def = compile(FUNCTION_DEF)?;
        Ok(Self {
            patterns,
            function_def,
        })
    }

    /// 命中时返回拦截原因
    pub fn check(&self, action: &str) -> Option<String> {
        if let Some(reason) = commands(action).find_map(|words| destructive_command(&words)) {
            return Some(reason.to_string());
        }
        if let Some((_, reason)) = self.patterns.iter().find(|(re, _)| re.is_match(action)) {
            return Some(reason.clone());
        }
        if self.is_fork_bomb(action) {
            return Some("fork bomb".to_string());
        }
        None
    }

    /// 函数体内把自身管道给自身并放到后台
    fn is_fork_bomb(&self, action: &str) -> bool {
        self.function_def.captures_iter(action).any(|caps| {
            let (Some(name), Some(body)) = (caps.get(1).or_else(|| caps.get(2)), caps.get(3)) else {
                return false;
            };
            let name = name.as_str();
            let body = body.as_str();
            body.contains('|') && body.contains('&') && body.matches(name).count() >= 2
        })
    }
}

/// 按 `;` `&` `|` 换行切成单条命令，每条去掉引号后按空白分词
fn commands(action: &str) -> impl Iterator<Item = Vec<String>> + '_ {
    action
        .split(|c: char| matches!(c, ';' | '&' | '|' | '\n' | '`'))
        .map(|segment| {
            segment
                .split_whitespace()
                .map(|w| {
                    w.trim_start_matches("$(")
                        .trim_matches(|c: char| matches!(c, '"' | '\'' | '(' | ')'))
                        .to_string()
                })
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|words| !words.is_empty())
}

/// 命令位置上的程序名及其参数（跳过环境变量赋值与 sudo 等包装）
fn invocation(words: &[String]) -> Option<(&str, &[String])> {
    let mut i = 0;
    while i < words.len() {
        let word = words[i].as_str();
        let program = word.rsplit('/').next().unwrap_or(word);
        if word.contains('=') && !word.starts_with('-') {
            i += 1;
        } else if WRAPPERS.contains(&program) {
            i += 1;
            while words.get(i).is_some_and(|w| w.starts_with('-')) {
                i += 1;
            }
        } else {
            return Some((program, &words[i + 1..]));
        }
    }
    None
}

/// 参数中的选项（`--` 之前）与操作数；选项可出现在操作数之后
fn split_args(args: &[String]) -> (Vec<&str>, Vec<&str>) {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    let mut only_operands = false;
    for arg in args {
        if only_operands {
            operands.push(arg.as_str());
        } else if arg == "--" {
            only_operands = true;
        } else if arg.starts_with('-') && arg.len() > 1 {
            flags.push(arg.as_str());
        } else {
            operands.push(arg.as_str());
        }
    }
    (flags, operands)
}

fn has_recursive_flag(flags: &[&str], short: &[char]) -> bool {
    flags.iter().any(|f| {
        *f == "--recursive"
            || (!f.starts_with("--") && f.trim_start_matches('-').chars().any(|c| short.contains(&c)))
    })
}

fn destructive_command(words: &[String]) -> Option<&'static str> {
    let (program, args) = invocation(words)?;
    let (flags, operands) = split_args(args);
    match program {
        "rm" if has_recursive_flag(&flags, &['r', 'R'])
            && operands.iter().any(|op| is_root_or_home(op)) =>
        {
            Some("recursive deletion of the root or home directory")
        }
        "chmod" | "chown" | "chgrp"
            if has_recursive_flag(&flags, &['R']) && operands.iter().any(|op| is_root(op)) =>
        {
            Some("recursive permission change on the root directory")
        }
        _ => None,
    }
}

/// 除 `/` `.` `..` `*` 外没有其他路径成分，如 `/`、`//`、`/.`、`/*`
fn only_root_components(path: &str) -> bool {
    path.split('/').all(|c| matches!(c, "" | "." | ".." | "*"))
}

fn is_root(path: &str) -> bool {
    path.starts_with('/') && only_root_components(path)
}

/// 根目录，或家目录本身及其全部内容（`~`、`~/*`、`$HOME/*`）
fn is_root_or_home(path: &str) -> bool {
    if is_root(path) {
        return true;
    }
    ["${HOME}", "$HOME", "~"]
        .iter()
        .find_map(|prefix| path.strip_prefix(*prefix))
        .is_some_and(|rest| (rest.is_empty() || rest.starts_with('/')) && only_root_components(rest))
}

fn compile(src: &str) -> Result<Regex, AgentError> {
    Regex::new(&format!("(?i){src}"))
        .map_err(|e| AgentError::Config(format!("invalid safety pattern `{src}`: {e}")))
}
