//! 任务内工作记忆：当前目标、已尝试的动作、失败原因
//!
//! 只在一次任务内有效，任务开始时清空；拼入能力 prompt，减少重复犯错。

const MAX_ITEMS: usize = 8;

#[derive(Clone, Debug, Default)]
pub struct WorkingMemory {
    pub goal: Option<String>,
    pub attempts: Vec<String>,
    pub failures: Vec<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = Some(goal.into());
    }

    pub fn add_attempt(&mut self, attempt: impl Into<String>) {
        push_bounded(&mut self.attempts, attempt.into());
    }

    pub fn add_failure(&mut self, failure: impl Into<String>) {
        push_bounded(&mut self.failures, failure.into());
    }

    pub fn clear(&mut self) {
        self.goal = None;
        self.attempts.clear();
        self.failures.clear();
    }

    /// Prompt 片段（Current Goal / What has been tried / Failures）
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if let Some(goal) = &self.goal {
            s.push_str(&format!("## Current Goal\n{goal}\n\n"));
        }
        push_list(&mut s, "What has been tried", &self.attempts);
        push_list(&mut s, "Failures", &self.failures);
        s
    }
}

fn push_bounded(list: &mut Vec<String>, item: String) {
    list.push(item);
    if list.len() > MAX_ITEMS {
        list.remove(0);
    }
}

fn push_list(s: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    s.push_str(&format!("## {title}\n"));
    for item in items {
        s.push_str(&format!("- {item}\n"));
    }
    s.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_section_and_bounds() {
        let mut wm = WorkingMemory::new();
        wm.set_goal("list files");
        for i in 0..12 {
            wm.add_attempt(format!("ls {i}"));
        }
        wm.add_failure("cat x -> exit 1");

        assert_eq!(wm.attempts.len(), MAX_ITEMS);
        assert_eq!(wm.attempts[0], "ls 4");
        let s = wm.to_prompt_section();
        assert!(s.contains("## Current Goal\nlist files"));
        assert!(s.contains("- cat x -> exit 1"));
        wm.clear();
        assert!(wm.to_prompt_section().is_empty());
    }
}
