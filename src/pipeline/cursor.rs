//! Cursor source processor.
//!
//! The in-pipeline half of cursoring: passes results through until the
//! page fills, then returns `Paused`. The command layer turns `Paused`
//! into a cursor-id reply and parks the whole pipeline in the registry;
//! `CURSOR READ` resumes it by resetting the page counter.

use super::{ExecContext, ResultProcessor, RpResult, RpStatus, RpType, SearchResult};

pub struct RpCursorSource {
    upstream: Box<dyn ResultProcessor>,
    page_size: usize,
    emitted: usize,
    depleted: bool,
}

impl RpCursorSource {
    pub fn new(upstream: Box<dyn ResultProcessor>, page_size: usize) -> Self {
        RpCursorSource {
            upstream,
            page_size: page_size.max(1),
            emitted: 0,
            depleted: false,
        }
    }

    /// Begin the next page; called by `CURSOR READ` on resume.
    pub fn reset_page(&mut self) {
        self.emitted = 0;
    }

    /// Override the page size (`CURSOR READ … COUNT n`).
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
    }

    /// True once the upstream reported Eof: the cursor is drained and the
    /// registry entry can be disposed.
    pub fn depleted(&self) -> bool {
        self.depleted
    }
}

impl ResultProcessor for RpCursorSource {
    fn rp_type(&self) -> RpType {
        RpType::CursorSource
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if self.depleted {
            return Ok(RpStatus::Eof);
        }
        if self.emitted >= self.page_size {
            return Ok(RpStatus::Paused);
        }
        let status = self.upstream.next(cx, out)?;
        match status {
            RpStatus::Ok => self.emitted += 1,
            RpStatus::Eof => self.depleted = true,
            RpStatus::Paused | RpStatus::TimedOut => {}
        }
        Ok(status)
    }

    fn upstream_mut(&mut self) -> Option<&mut Box<dyn ResultProcessor>> {
        Some(&mut self.upstream)
    }

    fn as_cursor_source(&mut self) -> Option<&mut RpCursorSource> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecContext;

    struct Numbers {
        upto: u64,
        at: u64,
    }

    impl ResultProcessor for Numbers {
        fn rp_type(&self) -> RpType {
            RpType::Index
        }

        fn next(&mut self, _cx: &ExecContext, out: &mut SearchResult) -> RpResult {
            if self.at >= self.upto {
                return Ok(RpStatus::Eof);
            }
            self.at += 1;
            out.doc_id = self.at;
            Ok(RpStatus::Ok)
        }
    }

    #[test]
    fn pages_then_pauses_then_resumes() {
        let mut source = RpCursorSource::new(Box::new(Numbers { upto: 5, at: 0 }), 2);
        let cx = ExecContext::unbounded();
        let mut out = SearchResult::new();

        let mut page = |source: &mut RpCursorSource| {
            let mut ids = Vec::new();
            loop {
                let mut res = SearchResult::new();
                match source.next(&cx, &mut res).unwrap() {
                    RpStatus::Ok => ids.push(res.doc_id),
                    status => return (ids, status),
                }
            }
        };

        assert_eq!(page(&mut source), (vec![1, 2], RpStatus::Paused));
        source.reset_page();
        assert_eq!(page(&mut source), (vec![3, 4], RpStatus::Paused));
        source.reset_page();
        assert_eq!(page(&mut source), (vec![5], RpStatus::Eof));
        assert!(source.depleted());
        // drained cursors stay at Eof
        assert_eq!(source.next(&cx, &mut out).unwrap(), RpStatus::Eof);
    }
}
