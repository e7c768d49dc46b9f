#[derive(Clone, Debug)]
pub struct ByteScanner<'a> {
    pointer: usize,
    data: &'a [u8],
}

impl<'a> ByteScanner<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Self {
        Self { pointer: 0, data }
    }

    pub fn position(&self) -> usize {
        self.pointer
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pointer).copied()
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let res = self.peek();
        if res.is_some() {
            self.pointer += 1;
        }
        res
    }

    /// Read bytes as long as `accept` holds, possibly none.
    pub fn read_while(&mut self, accept: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pointer;
        while let Some(x) = self.peek() {
            if !accept(x) {
                break;
            }
            self.pointer += 1;
        }
        &self.data[start..self.pointer]
    }

    pub fn skip_whitespace(&mut self) {
        self.read_while(|x| x.is_ascii_whitespace());
    }

    pub fn expect_byte(&mut self, test: u8) -> bool {
        match self.read_byte() {
            Some(x) => x == test,
            None => false,
        }
    }

    pub fn expect_eof(&mut self) -> bool {
        matches!(self.read_byte(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal() {
        let mut scanner = ByteScanner::from_bytes(b"12,ab ]");
        assert_eq!(scanner.read_while(|x| x.is_ascii_digit()), b"12");
        assert!(scanner.expect_byte(b','));
        assert_eq!(scanner.read_while(|x| x.is_ascii_alphabetic()), b"ab");
        scanner.skip_whitespace();
        assert_eq!(scanner.peek(), Some(b']'));
        assert!(scanner.expect_byte(b']'));
        assert!(scanner.expect_eof());
    }

    #[test]
    fn wrong_bytes() {
        let mut scanner = ByteScanner::from_bytes(&[0u8, 6u8]);
        assert!(!scanner.expect_byte(6u8));
        assert_eq!(scanner.position(), 1);
        assert!(scanner.read_while(|x| x == 0).is_empty());
    }
}
