//! Stages that rewrite postings into temporary copies

use ledger_math::{Amount, Annotation, Commodity, CommodityPool};
use log::debug;
use sha2::{Digest, Sha256};

use crate::account::{AccountFlags, AccountId};
use crate::context::ReportContext;
use crate::data_structures::{FastHashMap, FastHashSet};
use crate::expr::{ExprRef, Scope};
use crate::filters::{BoxedHandler, FilterResult, PostHandler};
use crate::posting::{PostFlags, PostId};
use crate::temporaries::Temporaries;
use crate::transaction::{XactFlags, XactId};
use crate::value::Value;

/// Which detail [`TransferDetails`] replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferField {
    SetDate,
    /// Prefix the account with the computed name
    SetAccount,
    SetPayee,
}

/// Copy each posting and replace one of its details with the value of an
/// expression. Null or empty results leave the copy unchanged.
pub struct TransferDetails {
    next: BoxedHandler,
    which: TransferField,
    expr: ExprRef,
    temps: Temporaries,
}

impl TransferDetails {
    pub fn new(next: BoxedHandler, which: TransferField, expr: ExprRef) -> Self {
        Self { next, which, expr, temps: Temporaries::new() }
    }

    fn move_to_account(&mut self, cx: &mut ReportContext, temp: PostId, prefix: &str) {
        let prev = cx.journal[temp].account;
        let path = format!("{}:{}", prefix, cx.journal.full_name(prev));
        let account = self.temps.create_account_from_path(&mut cx.journal, &path);

        cx.journal[prev].remove_post(temp);
        cx.journal[temp].account = account;
        cx.journal[account].posts.push(temp);

        let prev_flags = cx.journal[prev].flags - AccountFlags::TEMP;
        cx.journal[account].flags |= prev_flags;
        if let Some(xflags) = cx.xdata.account(prev).map(|x| x.flags) {
            cx.xdata.account_mut(account).flags |= xflags;
        }
    }
}

impl PostHandler for TransferDetails {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let origin = cx.journal[post].xact;
        let xact = self.temps.copy_xact(&mut cx.journal, origin);
        cx.journal[xact].date = cx.post_date(post);
        let temp = self.temps.copy_post(&mut cx.journal, &mut cx.xdata, post, xact, None);

        let substitute = self.expr.calc(&Scope::post(cx, temp))?;
        if !substitute.is_null_or_empty() {
            match self.which {
                TransferField::SetDate => {
                    let date = substitute.to_date()?;
                    cx.journal[temp].date = Some(date);
                    cx.xdata.post_mut(temp).date = Some(date);
                }
                TransferField::SetAccount => {
                    let prefix = substitute.to_string();
                    if !prefix.ends_with(':') {
                        self.move_to_account(cx, temp, &prefix);
                    }
                }
                TransferField::SetPayee => {
                    cx.journal[xact].payee = substitute.to_string();
                    cx.journal[temp].payee = None;
                }
            }
        }
        self.next.handle(cx, temp)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Salts in `1..=2_000_000_000`, reproducible from a seed
#[derive(Debug, Clone)]
struct SaltSequence {
    seed: u64,
    counter: u64,
}

impl SaltSequence {
    fn new(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }

    fn next(&mut self) -> u64 {
        self.counter += 1;
        let digest = Sha256::new()
            .chain_update(self.seed.to_le_bytes())
            .chain_update(self.counter.to_le_bytes())
            .finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        1 + u64::from_le_bytes(bytes) % 2_000_000_000
    }
}

fn hash_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Pseudonym for the `id`th commodity seen: base 26, least significant
/// letter first
fn commodity_pseudonym(mut id: usize) -> String {
    let mut symbol = String::new();
    loop {
        symbol.push(char::from(b'A' + (id % 26) as u8));
        id /= 26;
        if id == 0 {
            break symbol;
        }
    }
}

/// Hide payees, account names and commodities behind hashes and
/// pseudonyms, keeping amounts and structure intact.
pub struct AnonymizePosts {
    next: BoxedHandler,
    temps: Temporaries,
    commodities: FastHashMap<String, usize>,
    next_comm_id: usize,
    last_xact: Option<XactId>,
    salts: SaltSequence,
}

impl AnonymizePosts {
    pub fn new(next: BoxedHandler, seed: u64) -> Self {
        Self {
            next,
            temps: Temporaries::new(),
            commodities: FastHashMap::default(),
            next_comm_id: 0,
            last_xact: None,
            salts: SaltSequence::new(seed),
        }
    }

    /// Swap the commodity of `amount` for its pseudonym, dropping the lot
    /// tag and disguising the lot price as well.
    fn render_commodity(&mut self, pool: &mut CommodityPool, amount: &mut Amount) {
        let commodity = match amount.commodity() {
            Some(commodity) => commodity.clone(),
            None => return,
        };
        let base = Commodity::base_of(&commodity);

        let (id, newly_added) = match self.commodities.get(base.symbol()) {
            Some(id) => (*id, false),
            None => {
                let id = self.next_comm_id;
                self.next_comm_id += 1;
                self.commodities.insert(base.symbol().to_string(), id);
                (id, true)
            }
        };

        let pseudonym = pool.find_or_create(&commodity_pseudonym(id));
        if newly_added {
            pseudonym.add_flags(base.flags());
            pseudonym.set_precision(base.precision());
        }

        let rendered = match commodity.annotation() {
            Some(annotation) => {
                let mut details: Annotation = annotation.clone();
                details.tag = None;
                if let Some(price) = details.price.as_mut() {
                    self.render_commodity(pool, price);
                }
                pool.find_or_create_annotated(&pseudonym, details)
            }
            None => pseudonym,
        };
        amount.set_commodity(rendered);
    }

    fn anonymous_account(&mut self, cx: &mut ReportContext, account: AccountId) -> AccountId {
        let master = cx.journal.master();
        let mut lineage: Vec<AccountId> =
            cx.journal.ancestors(account).filter(|a| *a != master).collect();
        lineage.reverse();

        let mut names = Vec::with_capacity(lineage.len());
        for acct in lineage {
            let salt = self.salts.next();
            let name = &cx.journal[acct].name;
            names.push(hash_hex(&format!("{}{}{}", salt, name, cx.journal.full_name(acct))));
        }
        self.temps.create_account_from_path(&mut cx.journal, &names.join(":"))
    }
}

impl PostHandler for AnonymizePosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let origin = cx.journal[post].xact;
        let xact = match self.temps.last_xact() {
            Some(xact) if self.last_xact == Some(origin) => xact,
            _ => {
                let xact = self.temps.copy_xact(&mut cx.journal, origin);
                let payee = cx.journal[origin].payee.clone();
                let salt = self.salts.next();
                cx.journal[xact].payee = hash_hex(&format!("{}{}{}", payee, salt, payee));
                cx.journal[xact].note = None;
                self.last_xact = Some(origin);
                xact
            }
        };
        cx.journal[xact].code = None;

        let account = cx.journal[post].account;
        let account = self.anonymous_account(cx, account);
        let temp = self.temps.copy_post(&mut cx.journal, &mut cx.xdata, post, xact, Some(account));

        let mut amount = cx.journal[temp].amount.clone();
        let mut cost = cx.journal[temp].cost.clone();
        let mut assigned = cx.journal[temp].assigned_amount.clone();
        self.render_commodity(&mut cx.pool, &mut amount);
        for extra in cost.iter_mut().chain(assigned.iter_mut()) {
            self.render_commodity(&mut cx.pool, extra);
        }

        let p = &mut cx.journal[temp];
        p.amount = amount;
        p.cost = cost;
        p.assigned_amount = assigned;
        p.payee = None;
        p.note = None;
        p.flags |= PostFlags::ANONYMIZED;

        debug!(target: "filters.anonymize", "{} -> {}", post, temp);
        self.next.handle(cx, temp)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        self.commodities.clear();
        self.next_comm_id = 0;
        self.last_xact = None;
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

struct InjectedTag {
    tag: String,
    account: Option<AccountId>,
    /// Transactions whose own tag has already been injected once
    seen_xacts: FastHashSet<XactId>,
}

/// Turn tag values into extra postings. For every tag in the list, a
/// posting carrying it is preceded by a generated posting of the tag's
/// value in an account named after the tag. A tag found only on the
/// transaction is injected once per transaction.
pub struct InjectPosts {
    next: BoxedHandler,
    tags: Vec<InjectedTag>,
    temps: Temporaries,
}

impl InjectPosts {
    /// `tag_list` is comma separated
    pub fn new(next: BoxedHandler, tag_list: &str) -> Self {
        let tags = tag_list
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| InjectedTag { tag: tag.to_string(), account: None, seen_xacts: FastHashSet::default() })
            .collect();
        Self { next, tags, temps: Temporaries::new() }
    }

    fn tag_account(
        temps: &mut Temporaries,
        cx: &mut ReportContext,
        injected: &mut InjectedTag,
    ) -> AccountId {
        match injected.account {
            Some(account) => account,
            None => {
                let account = temps.create_account_from_path(&mut cx.journal, &injected.tag);
                cx.journal[account].flags |= AccountFlags::GENERATED;
                injected.account = Some(account);
                account
            }
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    value.map_or(true, |v| v.is_null_or_empty() || v.is_null_or_false())
}

impl PostHandler for InjectPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let origin = cx.journal[post].xact;
        for injected in &mut self.tags {
            let mut value = cx.journal[post].get_tag(&injected.tag).cloned();
            if is_blank(value.as_ref()) && !injected.seen_xacts.contains(&origin) {
                value = cx.journal[origin].get_tag(&injected.tag).cloned();
                if !is_blank(value.as_ref()) {
                    injected.seen_xacts.insert(origin);
                }
            }
            let value = match value {
                Some(value) if !is_blank(Some(&value)) => value,
                _ => continue,
            };

            let account = Self::tag_account(&mut self.temps, cx, injected);
            let xact = self.temps.copy_xact(&mut cx.journal, origin);
            cx.journal[xact].date = cx.post_date(post);
            cx.journal[xact].flags |= XactFlags::GENERATED;
            let temp = self.temps.copy_post(&mut cx.journal, &mut cx.xdata, post, xact, Some(account));
            cx.journal[temp].amount = value.to_amount()?;
            cx.journal[temp].flags |= PostFlags::GENERATED;
            self.next.handle(cx, temp)?;
        }
        self.next.handle(cx, post)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        for injected in &mut self.tags {
            injected.account = None;
            injected.seen_xacts.clear();
        }
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}
