//! Reordering and grouping stages

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;
use smallvec::SmallVec;

use crate::context::ReportContext;
use crate::expr::{ExprRef, Scope, SortKeys};
use crate::filters::{BoxedHandler, FilterResult, PostHandler};
use crate::posting::PostId;
use crate::transaction::XactId;
use crate::value::{OrderedValue, Value};
use crate::xdata::{PostXFlags, XDataTable};

/// Compute and cache the sort keys of `post`
fn calc_sort_values(cx: &mut ReportContext, keys: &SortKeys, post: PostId) -> FilterResult<()> {
    if cx.xdata.post_has(post, PostXFlags::SORT_CALC) {
        return Ok(());
    }
    let mut values: SmallVec<[(Value, bool); 2]> = SmallVec::new();
    for key in keys {
        values.push((key.expr.calc(&Scope::post(cx, post))?.simplified(), key.inverted));
    }
    let xdata = cx.xdata.post_mut(post);
    xdata.sort_values = values;
    xdata.flags |= PostXFlags::SORT_CALC;
    Ok(())
}

/// Lexicographic comparison of cached keys. Keys that cannot be ordered
/// (multi-commodity balances) count as equal.
fn compare_posts(xdata: &XDataTable, left: PostId, right: PostId) -> Ordering {
    let (left, right) = match (xdata.post(left), xdata.post(right)) {
        (Some(l), Some(r)) => (&l.sort_values, &r.sort_values),
        _ => return Ordering::Equal,
    };
    for ((lv, inverted), (rv, _)) in left.iter().zip(right.iter()) {
        match lv.sort_cmp(rv) {
            Some(Ordering::Equal) | None => continue,
            Some(ord) if *inverted => return ord.reverse(),
            Some(ord) => return ord,
        }
    }
    Ordering::Equal
}

/// Buffer every posting, then pass them on in sort order
pub struct SortPosts {
    next: BoxedHandler,
    sort_order: SortKeys,
    posts: Vec<PostId>,
}

impl SortPosts {
    pub fn new(next: BoxedHandler, sort_order: SortKeys) -> Self {
        Self { next, sort_order, posts: Vec::new() }
    }

    /// Sort and forward what has been buffered so far
    pub fn post_accumulated_posts(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let mut posts = std::mem::take(&mut self.posts);
        for &post in &posts {
            calc_sort_values(cx, &self.sort_order, post)?;
        }
        posts.sort_by(|a, b| compare_posts(&cx.xdata, *a, *b));

        for post in posts {
            cx.xdata.post_mut(post).flags.remove(PostXFlags::SORT_CALC);
            self.next.handle(cx, post)?;
        }
        Ok(())
    }
}

impl PostHandler for SortPosts {
    fn handle(&mut self, _cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        self.post_accumulated_posts(cx)?;
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.posts.clear();
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Sort the postings within each transaction, keeping transaction order
pub struct SortXacts {
    sorter: SortPosts,
    last_xact: Option<XactId>,
}

impl SortXacts {
    pub fn new(next: BoxedHandler, sort_order: SortKeys) -> Self {
        Self { sorter: SortPosts::new(next, sort_order), last_xact: None }
    }
}

impl PostHandler for SortXacts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let xact = cx.journal[post].xact;
        if self.last_xact.map_or(false, |last| last != xact) {
            self.sorter.post_accumulated_posts(cx)?;
        }
        self.sorter.handle(cx, post)?;
        self.last_xact = Some(xact);
        Ok(())
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.last_xact = None;
        self.sorter.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(&mut self.sorter)
    }
}

/// Group postings by a computed key and run the rest of the chain once per
/// group, in key order, flushing and clearing it between groups.
pub struct PostSplitter {
    post_chain: BoxedHandler,
    group_by_expr: ExprRef,
    posts_map: BTreeMap<OrderedValue, Vec<PostId>>,
    print_titles: bool,
}

impl PostSplitter {
    pub fn new(post_chain: BoxedHandler, group_by_expr: ExprRef, print_titles: bool) -> Self {
        Self { post_chain, group_by_expr, posts_map: BTreeMap::new(), print_titles }
    }
}

impl PostHandler for PostSplitter {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let result = self.group_by_expr.calc(&Scope::post(cx, post))?;
        if !result.is_null_or_empty() {
            self.posts_map.entry(OrderedValue(result)).or_default().push(post);
        }
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        for (key, posts) in std::mem::take(&mut self.posts_map) {
            debug!(target: "filters.splitter", "group {} with {} postings", key.0, posts.len());
            if self.print_titles {
                self.post_chain.title(cx, &key.0.to_string())?;
            }
            for post in posts {
                self.post_chain.handle(cx, post)?;
            }
            self.post_chain.flush(cx)?;
            self.post_chain.clear(cx);
        }
        Ok(())
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.posts_map.clear();
        self.post_chain.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.post_chain.as_mut())
    }
}

/// Keep only the first `head_count` and/or last `tail_count` transactions.
/// A negative count means all but that many.
pub struct TruncateXacts {
    next: BoxedHandler,
    head_count: i64,
    tail_count: i64,
    posts: Vec<PostId>,
    completed: bool,
    xacts_seen: i64,
    last_xact: Option<XactId>,
}

impl TruncateXacts {
    pub fn new(next: BoxedHandler, head_count: i64, tail_count: i64) -> Self {
        Self {
            next,
            head_count,
            tail_count,
            posts: Vec::new(),
            completed: false,
            xacts_seen: 0,
            last_xact: None,
        }
    }

    fn wanted(&self, index: i64, xact_count: i64) -> bool {
        let head = match self.head_count {
            0 => false,
            n if n > 0 => index < n,
            n => index >= -n,
        };
        head || match self.tail_count {
            0 => false,
            n if n > 0 => xact_count - index <= n,
            n => xact_count - index > -n,
        }
    }

    fn emit_buffered(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let posts = std::mem::take(&mut self.posts);
        let mut xacts: Vec<XactId> = posts.iter().map(|p| cx.journal[*p].xact).collect();
        xacts.sort_unstable();
        xacts.dedup();
        let xact_count = xacts.len() as i64;

        let mut current = None;
        let mut index = -1;
        for post in posts {
            let xact = cx.journal[post].xact;
            if current != Some(xact) {
                current = Some(xact);
                index += 1;
            }
            if self.wanted(index, xact_count) {
                self.next.handle(cx, post)?;
            }
        }
        Ok(())
    }
}

impl PostHandler for TruncateXacts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        if self.completed {
            return Ok(());
        }

        let xact = cx.journal[post].xact;
        if self.last_xact != Some(xact) {
            if self.last_xact.is_some() {
                self.xacts_seen += 1;
            }
            self.last_xact = Some(xact);
        }

        if self.tail_count == 0 && self.head_count > 0 && self.xacts_seen >= self.head_count {
            self.emit_buffered(cx)?;
            self.completed = true;
            return Ok(());
        }

        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        self.emit_buffered(cx)?;
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.completed = false;
        self.posts.clear();
        self.xacts_seen = 0;
        self.last_xact = None;
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}
