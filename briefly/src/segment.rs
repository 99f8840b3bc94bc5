//! Splits a two-anchor dialogue script into parts sized for one speech call each.

/// Minutes of broadcast covered by one script part.
pub const DEFAULT_MINUTES_PER_PART: u32 = 5;

/// Partitions a newline-separated script into contiguous parts.
///
/// A part never ends on a line of the non-terminal speaker (the anchor who opens
/// each exchange): such a line is pushed to the start of the next part instead.
/// Concatenating the returned parts with `\n` gives back the input exactly.
#[derive(Debug, Clone)]
pub struct ScriptSegmenter {
    minutes_per_part: u32,
    non_terminal_speaker: String,
}

impl ScriptSegmenter {
    pub fn new(non_terminal_speaker: impl Into<String>) -> Self {
        Self {
            minutes_per_part: DEFAULT_MINUTES_PER_PART,
            non_terminal_speaker: non_terminal_speaker.into(),
        }
    }

    pub fn with_minutes_per_part(mut self, minutes: u32) -> Self {
        self.minutes_per_part = minutes.max(1);
        self
    }

    /// `max(1, ceil(duration / minutes_per_part))`
    pub fn parts_count(&self, duration_minutes: u32) -> usize {
        (duration_minutes.div_ceil(self.minutes_per_part) as usize).max(1)
    }

    fn is_non_terminal(&self, line: &str) -> bool {
        line.trim_start()
            .strip_prefix(self.non_terminal_speaker.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }

    pub fn segment(&self, script: &str, duration_minutes: u32) -> Vec<String> {
        let lines: Vec<&str> = script.split('\n').collect();
        let total = lines.len();
        let parts_count = self.parts_count(duration_minutes);
        let lines_per_part = total.div_ceil(parts_count);

        let mut parts = Vec::with_capacity(parts_count);
        let mut shift_lines = false;

        for i in 0..parts_count {
            let is_last = i == parts_count - 1;

            let mut start = i * lines_per_part;
            if shift_lines {
                // previous part stopped one line early
                start = start.saturating_sub(1);
                shift_lines = false;
            }

            let mut end = if is_last { total } else { (i + 1) * lines_per_part };

            // The last part always runs to the end so no line is dropped.
            if !is_last && end <= total && end > start && self.is_non_terminal(lines[end - 1]) {
                end -= 1;
                shift_lines = true;
            }

            let (start, end) = (start.min(total), end.min(total));
            if start < end {
                parts.push(lines[start..end].join("\n"));
            }
        }

        parts
    }
}
