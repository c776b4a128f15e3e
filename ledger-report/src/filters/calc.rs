//! Matching, running totals and related postings

use crate::context::ReportContext;
use crate::expr::{ExprRef, Predicate, Scope};
use crate::filters::{BoxedHandler, FilterResult, PostHandler};
use crate::posting::{PostFlags, PostId};
use crate::xdata::{AccountXFlags, PostXFlags};

/// Pass on only the postings matching a predicate
pub struct FilterPosts {
    next: BoxedHandler,
    predicate: Predicate,
}

impl FilterPosts {
    pub fn new(next: BoxedHandler, predicate: Predicate) -> Self {
        Self { next, predicate }
    }
}

impl PostHandler for FilterPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        if self.predicate.matches(&Scope::post(cx, post))? {
            cx.xdata.post_mut(post).flags |= PostXFlags::MATCHES;
            self.next.handle(cx, post)?;
        }
        Ok(())
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Number postings, accumulate their visited value and, optionally, the
/// running total.
pub struct CalcPosts {
    next: BoxedHandler,
    amount_expr: ExprRef,
    calc_running_total: bool,
    last_post: Option<PostId>,
}

impl CalcPosts {
    pub fn new(next: BoxedHandler, amount_expr: ExprRef, calc_running_total: bool) -> Self {
        Self { next, amount_expr, calc_running_total, last_post: None }
    }
}

impl PostHandler for CalcPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let (count, mut total) = match self.last_post.and_then(|last| cx.xdata.post(last)) {
            Some(last) => (last.count + 1, last.total.clone()),
            None => (1, Default::default()),
        };

        let mut visited = cx.xdata.post(post).map(|x| x.visited_value.clone()).unwrap_or_default();
        cx.add_to_value(post, &mut visited, Some(&self.amount_expr))?;
        if self.calc_running_total {
            total.add_or_set(&visited)?;
        }

        let xdata = cx.xdata.post_mut(post);
        xdata.count = count;
        xdata.visited_value = visited;
        xdata.flags |= PostXFlags::VISITED;
        if self.calc_running_total {
            xdata.total = total;
        }
        let account = cx.reported_account(post);
        cx.xdata.account_mut(account).flags |= AccountXFlags::VISITED;

        self.next.handle(cx, post)?;
        self.last_post = Some(post);
        Ok(())
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.last_post = None;
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Replace each received posting by the other postings of its transaction.
///
/// Generated and virtual siblings are skipped; siblings that were received
/// themselves are only passed on with `also_matching`.
pub struct RelatedPosts {
    next: BoxedHandler,
    posts: Vec<PostId>,
    also_matching: bool,
}

impl RelatedPosts {
    pub fn new(next: BoxedHandler, also_matching: bool) -> Self {
        Self { next, posts: Vec::new(), also_matching }
    }
}

impl PostHandler for RelatedPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        cx.xdata.post_mut(post).flags |= PostXFlags::RECEIVED;
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        for post in std::mem::take(&mut self.posts) {
            let xact = cx.journal[post].xact;
            let siblings = cx.journal[xact].posts.clone();
            for sibling in siblings {
                let handled = cx.xdata.post_has(sibling, PostXFlags::HANDLED);
                let received = cx.xdata.post_has(sibling, PostXFlags::RECEIVED);
                let wanted = if received {
                    self.also_matching
                } else {
                    !cx.journal[sibling].flags.intersects(PostFlags::GENERATED | PostFlags::VIRTUAL)
                };
                if !handled && wanted {
                    cx.xdata.post_mut(sibling).flags |= PostXFlags::HANDLED;
                    self.next.handle(cx, sibling)?;
                }
            }
        }
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
