//! 字节偏移 -> 行号

/// 单调递增偏移的行号计算器，避免每次从头扫描
#[derive(Debug)]
pub struct LineCounter<'a> {
    text: &'a str,
    offset: usize,
    line: u32,
}

impl<'a> LineCounter<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            offset: 0,
            line: 1,
        }
    }

    /// 返回偏移所在行（从 1 开始）；偏移回退时重新计数
    pub fn line_at(&mut self, offset: usize) -> u32 {
        let offset = offset.min(self.text.len());
        if offset < self.offset {
            self.offset = 0;
            self.line = 1;
        }
        let newlines = self.text.as_bytes()[self.offset..offset]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        self.line += newlines as u32;
        self.offset = offset;
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_at_monotonic_and_rewind() {
        let text = "a\nbb\n\nccc";
        let mut counter = LineCounter::new(text);
        assert_eq!(counter.line_at(0), 1);
        assert_eq!(counter.line_at(3), 2);
        assert_eq!(counter.line_at(6), 4);
        // 回退
        assert_eq!(counter.line_at(2), 2);
        // 越界截断
        assert_eq!(counter.line_at(100), 4);
    }
}
