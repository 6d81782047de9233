// src/exec/tail.rs

/// Keeps only the last `max_chars` characters written to it.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    text: String,
    max_chars: usize,
}

impl TailBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            max_chars,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        let count = self.text.chars().count();
        if count > self.max_chars {
            let skip = count - self.max_chars;
            let cut = self
                .text
                .char_indices()
                .nth(skip)
                .map(|(i, _)| i)
                .unwrap_or(self.text.len());
            self.text.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_tail() {
        let mut tail = TailBuffer::new(5);
        tail.push("abc");
        tail.push("defgh");
        assert_eq!(tail.as_str(), "defgh");
    }

    #[test]
    fn cuts_on_char_boundaries() {
        let mut tail = TailBuffer::new(3);
        tail.push("ääää");
        assert_eq!(tail.as_str(), "äää");
    }
}
