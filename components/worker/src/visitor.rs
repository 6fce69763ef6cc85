// Copyright 2024 hearth
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{self, Read};

/// Consumes the decompressed payload of one chunk without materializing it.
///
/// A visitor is moved onto the worker, fed the stream and handed back to the
/// caller. It is never called for an absent chunk.
pub trait StreamVisitor: Send + 'static {
    fn visit(&mut self, input: &mut dyn Read) -> io::Result<()>;
}

impl<V: StreamVisitor + ?Sized> StreamVisitor for Box<V> {
    fn visit(&mut self, input: &mut dyn Read) -> io::Result<()> { (**self).visit(input) }
}

/// Collects the whole payload.
impl StreamVisitor for Vec<u8> {
    fn visit(&mut self, input: &mut dyn Read) -> io::Result<()> {
        input.read_to_end(self).map(|_| ())
    }
}

/// Reads at most `limit` bytes from the front of the payload.
#[derive(Debug, Clone, Default)]
pub struct HeadVisitor {
    limit:   usize,
    head:    Vec<u8>,
    visited: bool,
}

impl HeadVisitor {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            head: Vec::with_capacity(limit),
            visited: false,
        }
    }

    pub fn head(&self) -> &[u8] { &self.head }

    pub fn visited(&self) -> bool { self.visited }
}

impl StreamVisitor for HeadVisitor {
    fn visit(&mut self, input: &mut dyn Read) -> io::Result<()> {
        self.visited = true;
        self.head.clear();
        input.take(self.limit as u64).read_to_end(&mut self.head)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_stops_at_limit() {
        let mut visitor = HeadVisitor::new(4);
        assert!(!visitor.visited());
        let mut input: &[u8] = b"abcdefgh";
        visitor.visit(&mut input).unwrap();
        assert!(visitor.visited());
        assert_eq!(visitor.head(), b"abcd");
        // the rest is left unread.
        assert_eq!(input, b"efgh");
    }

    #[test]
    fn boxed_visitor_delegates() {
        let mut visitor: Box<dyn StreamVisitor> = Box::new(Vec::<u8>::new());
        let mut input: &[u8] = b"payload";
        visitor.visit(&mut input).unwrap();
        assert!(input.is_empty());
    }
}
