//! The sql-like query text that backs a
//! widget: `<predicates> [ORDER BY
//! <key>, ...] [LIMIT <n>]`.
//!
//! Predicates combine with `and`, `or`
//! and parentheses; adjacent predicates
//! are implicitly and-ed. Quoted text
//! keeps its spaces, so a tag name with
//! spaces is written `tag:"Two words"`;
//! inside quotes `\"` is a literal
//! quote.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::slice;
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Duration,
  SecondsFormat,
  Utc
};
use regex::{
  NoExpand,
  Regex
};
use tracing::trace;

use crate::datetime::{
  parse_date_expr,
  to_project_date
};
use crate::task::{
  Tag,
  TaskRecord
};

/// Seconds a completed task stays
/// visible when recently completed
/// tasks are shown.
pub const RECENTLY_COMPLETED_SECS: i64 =
  60;

#[derive(Debug, Clone)]
pub enum Pred {
  Id(i64),
  TagId(i64),
  TagName(String),
  VirtualTagInclude(VirtualTag),
  VirtualTagExclude(VirtualTag),
  Importance(i64),
  DueBefore(DateTime<Utc>),
  DueAfter(DateTime<Utc>),
  CompletedAfter(DateTime<Utc>),
  TextContains(String)
}

#[derive(Debug, Clone, Copy)]
pub enum VirtualTag {
  Pending,
  Completed,
  Deleted,
  Due,
  Overdue,
  Today,
  Repeating
}

#[derive(Debug, Clone)]
enum Expr {
  True,
  Pred(Pred),
  And(Vec<Expr>),
  Or(Vec<Expr>)
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum SortKey {
  Smart,
  Title,
  Due,
  Importance,
  Modified,
  Widget
}

impl SortKey {
  fn parse(raw: &str) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "smart" => Some(Self::Smart),
      | "title" => Some(Self::Title),
      | "due" => Some(Self::Due),
      | "importance" => {
        Some(Self::Importance)
      }
      | "modified" => {
        Some(Self::Modified)
      }
      | "widget" => Some(Self::Widget),
      | _ => None
    }
  }
}

/// Sort order preference, as stored
/// under `sort_order`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum SortOrder {
  Auto,
  Alpha,
  DueDate,
  Importance,
  Modified,
  Widget
}

impl SortOrder {
  pub fn from_pref(raw: i32) -> Self {
    match raw {
      | 1 => Self::Alpha,
      | 2 => Self::DueDate,
      | 3 => Self::Importance,
      | 4 => Self::Modified,
      | 5 => Self::Widget,
      | _ => Self::Auto
    }
  }

  fn clause(self) -> &'static str {
    match self {
      | Self::Auto => "smart",
      | Self::Alpha => "title",
      | Self::DueDate => "due",
      | Self::Importance => {
        "importance"
      }
      | Self::Modified => "modified",
      | Self::Widget => "widget"
    }
  }
}

/// Visibility flags, as stored under
/// `sort_flags`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct SortFlags(pub i32);

impl SortFlags {
  pub const SHOW_COMPLETED: i32 = 1;
  pub const SHOW_RECENTLY_COMPLETED:
    i32 = 1 << 1;

  pub fn contains(
    self,
    flag: i32
  ) -> bool {
    self.0 & flag != 0
  }

  pub fn with(
    self,
    flag: i32
  ) -> Self {
    Self(self.0 | flag)
  }
}

/// The three clauses of a query text,
/// split without interpreting the
/// predicates.
#[derive(
  Debug, Clone, PartialEq, Eq,
)]
pub struct QueryParts {
  pub predicates: String,
  pub order:      Option<String>,
  pub limit:      Option<usize>
}

impl QueryParts {
  pub fn split(text: &str) -> Self {
    let Some(caps) = clause_re()
      .and_then(|re| re.captures(text))
    else {
      return Self {
        predicates: text
          .trim()
          .to_string(),
        order:      None,
        limit:      None
      };
    };

    Self {
      predicates: caps
        .name("predicates")
        .map(|m| m.as_str().trim())
        .unwrap_or_default()
        .to_string(),
      order:      caps
        .name("order")
        .map(|m| {
          m.as_str().trim().to_string()
        })
        .filter(|order| {
          !order.is_empty()
        }),
      limit:      caps
        .name("limit")
        .and_then(|m| {
          m.as_str().parse().ok()
        })
    }
  }

  pub fn render(&self) -> String {
    let mut out =
      self.predicates.trim().to_string();
    if let Some(order) = &self.order {
      if !out.is_empty() {
        out.push(' ');
      }
      out.push_str("ORDER BY ");
      out.push_str(order);
    }
    if let Some(limit) = self.limit {
      if !out.is_empty() {
        out.push(' ');
      }
      out.push_str(&format!(
        "LIMIT {limit}"
      ));
    }
    out
  }
}

fn cached_regex(
  cell: &'static OnceLock<Option<Regex>>,
  pattern: &str
) -> Option<&'static Regex> {
  cell
    .get_or_init(|| {
      Regex::new(pattern)
        .map_err(|err| {
          tracing::error!(
            pattern,
            error = %err,
            "internal regex compile failure"
          );
        })
        .ok()
    })
    .as_ref()
}

fn clause_re() -> Option<&'static Regex>
{
  static CLAUSES: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  cached_regex(
    &CLAUSES,
    r"(?s)^(?P<predicates>.*?)(?:\s*\bORDER BY\s+(?P<order>.*?))?(?:\s*\bLIMIT\s+(?P<limit>\d+))?\s*$"
  )
}

fn limit_re() -> Option<&'static Regex>
{
  static LIMIT: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  cached_regex(
    &LIMIT,
    r"\s*\bLIMIT\s+\d+"
  )
}

fn pending_re() -> Option<&'static Regex>
{
  static PENDING: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  cached_regex(
    &PENDING,
    r"\+PENDING\b"
  )
}

/// Removes every literal `LIMIT <n>`
/// clause. Display bounds belong to
/// the cursor consumer.
pub fn strip_limit(
  query: &str
) -> String {
  match limit_re() {
    | Some(re) => {
      re.replace_all(query, "")
        .trim()
        .to_string()
    }
    | None => query.trim().to_string()
  }
}

/// Widens `+PENDING` according to the
/// flags and replaces the `ORDER BY`
/// clause with `order`.
pub fn adjust_for_flags_and_sort(
  query: &str,
  flags: SortFlags,
  order: SortOrder,
  now: DateTime<Utc>
) -> String {
  let widened = if let Some(re) =
    pending_re()
    && flags.contains(
      SortFlags::SHOW_COMPLETED
    )
  {
    re.replace_all(
      query,
      NoExpand("-DELETED")
    )
    .into_owned()
  } else if let Some(re) = pending_re()
    && flags.contains(
    SortFlags::SHOW_RECENTLY_COMPLETED
  ) {
    let since = (now
      - Duration::seconds(
        RECENTLY_COMPLETED_SECS
      ))
      .to_rfc3339_opts(
        SecondsFormat::Secs,
        true
      );
    let replacement = format!(
      "( +PENDING or ( \
       completed.after:{since} \
       -DELETED ) )"
    );
    re.replace_all(
      query,
      NoExpand(&replacement)
    )
    .into_owned()
  } else {
    query.to_string()
  };

  let mut parts =
    QueryParts::split(&widened);
  parts.order =
    Some(order.clause().to_string());
  parts.render()
}

/// Restricts the query to the tag
/// called `name`, unless it already
/// is.
pub fn inject_tag_restriction(
  query: &str,
  name: &str
) -> String {
  let term = tag_term(name);
  let mut parts =
    QueryParts::split(query);
  if parts.predicates.contains(&term) {
    return parts.render();
  }
  parts.predicates =
    if parts.predicates.is_empty() {
      term
    } else {
      format!(
        "( {} ) {term}",
        parts.predicates
      )
    };
  parts.render()
}

/// `tag:"<name>"`, with quotes and
/// backslashes in `name` escaped.
pub fn tag_term(name: &str) -> String {
  let escaped = name
    .replace('\\', "\\\\")
    .replace('"', "\\\"");
  format!("tag:\"{escaped}\"")
}

/// Data a predicate may need besides
/// the task itself.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
  pub now:  DateTime<Utc>,
  pub tags: &'a [Tag]
}

#[derive(Debug, Clone)]
pub struct Query {
  expr:      Expr,
  order:     Vec<SortKey>,
  pub limit: Option<usize>
}

impl Query {
  #[tracing::instrument(skip(now))]
  pub fn parse(
    text: &str,
    now: DateTime<Utc>
  ) -> anyhow::Result<Self> {
    let parts = QueryParts::split(text);

    let tokens =
      lex(&parts.predicates)?;
    let expr = if tokens.is_empty() {
      Expr::True
    } else {
      let mut parser = Parser {
        tokens: tokens.iter().peekable(),
        now
      };
      let expr = parser.disjunction()?;
      parser.finish()?;
      expr
    };

    let order = match &parts.order {
      | Some(raw) => {
        raw
          .split(',')
          .map(|key| {
            SortKey::parse(key)
              .ok_or_else(|| {
                anyhow!(
                  "unknown sort key: \
                   {}",
                  key.trim()
                )
              })
          })
          .collect::<anyhow::Result<
            Vec<_>
          >>()?
      }
      | None => vec![]
    };

    Ok(Self {
      expr,
      order,
      limit: parts.limit
    })
  }

  pub fn matches(
    &self,
    task: &TaskRecord,
    ctx: EvalContext<'_>
  ) -> bool {
    eval_expr(&self.expr, task, ctx)
  }

  /// Sorts by the `ORDER BY` keys;
  /// completed tasks always go last.
  pub fn sort(
    &self,
    tasks: &mut [TaskRecord]
  ) {
    let keys = if self.order.is_empty()
    {
      vec![SortKey::Smart]
    } else {
      self.order.clone()
    };

    tasks.sort_by(|a, b| {
      a.is_completed()
        .cmp(&b.is_completed())
        .then_with(|| {
          keys.iter().fold(
            Ordering::Equal,
            |acc, key| {
              acc.then_with(|| {
                compare_by(*key, a, b)
              })
            }
          )
        })
        .then_with(|| a.id.cmp(&b.id))
    });
  }
}

fn compare_by(
  key: SortKey,
  a: &TaskRecord,
  b: &TaskRecord
) -> Ordering {
  match key {
    | SortKey::Smart => {
      a.importance
        .cmp(&b.importance)
        .then_with(|| {
          due_first(a, b)
        })
        .then_with(|| {
          compare_title(a, b)
        })
    }
    | SortKey::Title => {
      compare_title(a, b)
    }
    | SortKey::Due => {
      due_first(a, b).then_with(|| {
        a.importance.cmp(&b.importance)
      })
    }
    | SortKey::Importance => {
      a.importance
        .cmp(&b.importance)
        .then_with(|| {
          due_first(a, b)
        })
    }
    | SortKey::Modified => {
      b.modified.cmp(&a.modified)
    }
    | SortKey::Widget => {
      due_first(a, b)
        .then_with(|| {
          a.importance
            .cmp(&b.importance)
        })
        .then_with(|| {
          compare_title(a, b)
        })
    }
  }
}

fn due_first(
  a: &TaskRecord,
  b: &TaskRecord
) -> Ordering {
  match (a.due, b.due) {
    | (Some(x), Some(y)) => x.cmp(&y),
    | (Some(_), None) => Ordering::Less,
    | (None, Some(_)) => {
      Ordering::Greater
    }
    | (None, None) => Ordering::Equal
  }
}

fn compare_title(
  a: &TaskRecord,
  b: &TaskRecord
) -> Ordering {
  a.title
    .to_lowercase()
    .cmp(&b.title.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Open,
  Close,
  And,
  Or,
  Term(String)
}

impl std::fmt::Display for Token {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    match self {
      | Self::Open => f.write_str("'('"),
      | Self::Close => f.write_str("')'"),
      | Self::And => f.write_str("'and'"),
      | Self::Or => f.write_str("'or'"),
      | Self::Term(term) => {
        write!(f, "'{term}'")
      }
    }
  }
}

/// Splits predicate text into tokens.
///
/// Inside double quotes whitespace,
/// parentheses and connectives are
/// literal, and `\"` / `\\` stand for a
/// quote and a backslash. A quoted word
/// is always a term, so `"or"` searches
/// for the text `or`.
fn lex(
  text: &str
) -> anyhow::Result<Vec<Token>> {
  let mut tokens = Vec::new();
  let mut word = String::new();
  let mut had_quotes = false;
  let mut in_quotes = false;
  let mut chars = text.chars();

  while let Some(ch) = chars.next() {
    if in_quotes {
      match ch {
        | '"' => in_quotes = false,
        | '\\' => {
          match chars.next() {
            | Some(
              escaped @ ('"' | '\\')
            ) => word.push(escaped),
            | Some(other) => {
              word.push('\\');
              word.push(other);
            }
            | None => {
              return Err(anyhow!(
                "dangling escape in \
                 query: {text}"
              ));
            }
          }
        }
        | _ => word.push(ch)
      }
      continue;
    }

    match ch {
      | '"' => {
        in_quotes = true;
        had_quotes = true;
      }
      | '(' | ')' => {
        push_word(
          &mut tokens,
          &mut word,
          &mut had_quotes
        );
        tokens.push(if ch == '(' {
          Token::Open
        } else {
          Token::Close
        });
      }
      | ch if ch.is_whitespace() => {
        push_word(
          &mut tokens,
          &mut word,
          &mut had_quotes
        );
      }
      | _ => word.push(ch)
    }
  }

  if in_quotes {
    return Err(anyhow!(
      "unterminated quote in query: \
       {text}"
    ));
  }
  push_word(
    &mut tokens,
    &mut word,
    &mut had_quotes
  );
  Ok(tokens)
}

fn push_word(
  tokens: &mut Vec<Token>,
  word: &mut String,
  had_quotes: &mut bool
) {
  if word.is_empty() && !*had_quotes {
    return;
  }
  let word = std::mem::take(word);
  let token = if std::mem::take(
    had_quotes
  ) {
    Token::Term(word)
  } else {
    match word
      .to_ascii_lowercase()
      .as_str()
    {
      | "and" | "&&" => Token::And,
      | "or" | "||" => Token::Or,
      | _ => Token::Term(word)
    }
  };
  tokens.push(token);
}

/// Recursive descent over the tokens:
/// `or` binds loosest, then `and`,
/// which adjacent operands also imply.
struct Parser<'a> {
  tokens: Peekable<slice::Iter<'a, Token>>,
  now:    DateTime<Utc>
}

impl Parser<'_> {
  fn disjunction(
    &mut self
  ) -> anyhow::Result<Expr> {
    let mut arms =
      vec![self.conjunction()?];
    while self
      .tokens
      .next_if(|tok| **tok == Token::Or)
      .is_some()
    {
      arms.push(self.conjunction()?);
    }
    Ok(collapse(arms, Expr::Or))
  }

  fn conjunction(
    &mut self
  ) -> anyhow::Result<Expr> {
    let mut operands =
      vec![self.operand()?];
    loop {
      match self.tokens.peek() {
        | Some(Token::And) => {
          self.tokens.next();
          operands.push(self.operand()?);
        }
        | Some(
          Token::Open | Token::Term(_)
        ) => {
          operands.push(self.operand()?)
        }
        | _ => break
      }
    }
    Ok(collapse(operands, Expr::And))
  }

  fn operand(
    &mut self
  ) -> anyhow::Result<Expr> {
    match self.tokens.next() {
      | Some(Token::Open) => {
        let inner = self.disjunction()?;
        match self.tokens.next() {
          | Some(Token::Close) => Ok(inner),
          | Some(other) => {
            Err(anyhow!(
              "expected ')' in query, \
               found {other}"
            ))
          }
          | None => {
            Err(anyhow!(
              "missing ')' in query"
            ))
          }
        }
      }
      | Some(Token::Term(term)) => {
        Ok(Expr::Pred(parse_atom(
          term, self.now
        )?))
      }
      | Some(other) => {
        Err(anyhow!(
          "unexpected {other} in query"
        ))
      }
      | None => {
        Err(anyhow!(
          "query ends where a \
           predicate was expected"
        ))
      }
    }
  }

  fn finish(
    mut self
  ) -> anyhow::Result<()> {
    match self.tokens.next() {
      | None => Ok(()),
      | Some(extra) => {
        Err(anyhow!(
          "unexpected {extra} in query"
        ))
      }
    }
  }
}

fn collapse(
  mut nodes: Vec<Expr>,
  join: fn(Vec<Expr>) -> Expr
) -> Expr {
  if nodes.len() == 1
    && let Some(only) = nodes.pop()
  {
    return only;
  }
  join(nodes)
}

fn parse_atom(
  term: &str,
  now: DateTime<Utc>
) -> anyhow::Result<Pred> {
  if let Some(tag) =
    term.strip_prefix('+')
    && let Some(virtual_tag) =
      parse_virtual_tag(tag)
  {
    return Ok(
      Pred::VirtualTagInclude(
        virtual_tag
      )
    );
  }
  if let Some(tag) =
    term.strip_prefix('-')
    && let Some(virtual_tag) =
      parse_virtual_tag(tag)
  {
    return Ok(
      Pred::VirtualTagExclude(
        virtual_tag
      )
    );
  }

  if let Some(raw) =
    term.strip_prefix("id:")
  {
    return Ok(Pred::Id(
      parse_int(raw, "id")?
    ));
  }

  if let Some(raw) =
    term.strip_prefix("tagid:")
  {
    return Ok(Pred::TagId(
      parse_int(raw, "tagid")?
    ));
  }

  if let Some(name) =
    term.strip_prefix("tag:")
  {
    return Ok(Pred::TagName(
      name.to_string()
    ));
  }

  if let Some(raw) =
    term.strip_prefix("importance:")
  {
    return Ok(Pred::Importance(
      parse_int(raw, "importance")?
    ));
  }

  if let Some(value) =
    term.strip_prefix("due.before:")
  {
    return Ok(Pred::DueBefore(
      parse_date_expr(value, now)?
    ));
  }

  if let Some(value) =
    term.strip_prefix("due.after:")
  {
    return Ok(Pred::DueAfter(
      parse_date_expr(value, now)?
    ));
  }

  if let Some(value) = term
    .strip_prefix("completed.after:")
  {
    return Ok(Pred::CompletedAfter(
      parse_date_expr(value, now)?
    ));
  }

  Ok(Pred::TextContains(
    term.to_string()
  ))
}

fn parse_int(
  raw: &str,
  field: &str
) -> anyhow::Result<i64> {
  raw.trim().parse().map_err(|_| {
    anyhow!(
      "{field} expects an integer, \
       got: {raw}"
    )
  })
}

fn parse_virtual_tag(
  tag: &str
) -> Option<VirtualTag> {
  match tag {
    | "PENDING" => {
      Some(VirtualTag::Pending)
    }
    | "COMPLETED" => {
      Some(VirtualTag::Completed)
    }
    | "DELETED" => {
      Some(VirtualTag::Deleted)
    }
    | "DUE" => Some(VirtualTag::Due),
    | "OVERDUE" => {
      Some(VirtualTag::Overdue)
    }
    | "TODAY" => {
      Some(VirtualTag::Today)
    }
    | "REPEATING" => {
      Some(VirtualTag::Repeating)
    }
    | _ => None
  }
}

fn eval_expr(
  expr: &Expr,
  task: &TaskRecord,
  ctx: EvalContext<'_>
) -> bool {
  match expr {
    | Expr::True => true,
    | Expr::Pred(pred) => {
      eval_pred(pred, task, ctx)
    }
    | Expr::And(nodes) => {
      nodes.iter().all(|node| {
        eval_expr(node, task, ctx)
      })
    }
    | Expr::Or(nodes) => {
      nodes.iter().any(|node| {
        eval_expr(node, task, ctx)
      })
    }
  }
}

fn eval_pred(
  pred: &Pred,
  task: &TaskRecord,
  ctx: EvalContext<'_>
) -> bool {
  let ok = match pred {
    | Pred::Id(id) => task.id == *id,
    | Pred::TagId(id) => {
      task.tags.contains(id)
    }
    | Pred::TagName(name) => {
      ctx
        .tags
        .iter()
        .find(|tag| tag.name == *name)
        .map(|tag| {
          task.tags.contains(&tag.id)
        })
        .unwrap_or(false)
    }
    | Pred::VirtualTagInclude(
      virtual_tag
    ) => {
      eval_virtual_tag(
        *virtual_tag,
        task,
        ctx.now
      )
    }
    | Pred::VirtualTagExclude(
      virtual_tag
    ) => {
      !eval_virtual_tag(
        *virtual_tag,
        task,
        ctx.now
      )
    }
    | Pred::Importance(level) => {
      task.importance == *level
    }
    | Pred::DueBefore(dt) => {
      task
        .due
        .map(|due| due < *dt)
        .unwrap_or(false)
    }
    | Pred::DueAfter(dt) => {
      task
        .due
        .map(|due| due > *dt)
        .unwrap_or(false)
    }
    | Pred::CompletedAfter(dt) => {
      task
        .completed
        .map(|done| done >= *dt)
        .unwrap_or(false)
    }
    | Pred::TextContains(text) => {
      task
        .title
        .to_lowercase()
        .contains(&text.to_lowercase())
    }
  };

  trace!(pred = ?pred, id = task.id, ok, "query predicate evaluation");
  ok
}

fn eval_virtual_tag(
  virtual_tag: VirtualTag,
  task: &TaskRecord,
  now: DateTime<Utc>
) -> bool {
  let today = to_project_date(now);

  match virtual_tag {
    | VirtualTag::Pending => {
      !task.is_completed()
        && !task.is_deleted()
    }
    | VirtualTag::Completed => {
      task.is_completed()
    }
    | VirtualTag::Deleted => {
      task.is_deleted()
    }
    | VirtualTag::Due => {
      task
        .due
        .map(|due| {
          to_project_date(due) <= today
        })
        .unwrap_or(false)
    }
    | VirtualTag::Overdue => {
      !task.is_completed()
        && task.is_overdue(now)
    }
    | VirtualTag::Today => {
      task
        .due
        .map(|due| {
          to_project_date(due) == today
        })
        .unwrap_or(false)
    }
    | VirtualTag::Repeating => {
      task
        .recurrence
        .as_deref()
        .map(|rule| {
          !rule.trim().is_empty()
        })
        .unwrap_or(false)
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::{
    EvalContext,
    Query,
    QueryParts,
    SortFlags,
    SortOrder,
    adjust_for_flags_and_sort,
    inject_tag_restriction,
    strip_limit
  };
  use crate::task::{
    Tag,
    TaskRecord
  };

  #[test]
  fn splits_order_and_limit_clauses() {
    let parts = QueryParts::split(
      "+PENDING tag:\"Two words\" \
       ORDER BY due, title LIMIT 25"
    );
    assert_eq!(
      parts.predicates,
      "+PENDING tag:\"Two words\""
    );
    assert_eq!(
      parts.order.as_deref(),
      Some("due, title")
    );
    assert_eq!(parts.limit, Some(25));

    let bare =
      QueryParts::split("+PENDING");
    assert_eq!(bare.order, None);
    assert_eq!(bare.limit, None);
    assert_eq!(bare.render(), "+PENDING");
  }

  #[test]
  fn strip_limit_removes_every_limit_clause()
  {
    assert_eq!(
      strip_limit(
        "+PENDING ORDER BY due LIMIT 10"
      ),
      "+PENDING ORDER BY due"
    );
    assert_eq!(
      strip_limit("LIMIT 3"),
      ""
    );
    assert_eq!(
      strip_limit("+PENDING"),
      "+PENDING"
    );
  }

  #[test]
  fn recently_completed_widens_pending() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 16, 5, 0, 0
      )
      .unwrap();
    let adjusted =
      adjust_for_flags_and_sort(
        "+PENDING ORDER BY title",
        SortFlags(0).with(
          SortFlags::SHOW_RECENTLY_COMPLETED
        ),
        SortOrder::Widget,
        now
      );
    assert!(adjusted.contains(
      "completed.after:2026-02-16T04:59:00Z"
    ));
    assert!(
      adjusted.ends_with("ORDER BY widget")
    );

    let query =
      Query::parse(&adjusted, now)
        .unwrap();
    let mut done = TaskRecord::new(
      1,
      "just done".to_string(),
      now
    );
    done.completed =
      Some(now - Duration::seconds(5));
    let mut old = done.clone();
    old.completed =
      Some(now - Duration::days(2));

    let ctx = EvalContext {
      now,
      tags: &[]
    };
    assert!(query.matches(&done, ctx));
    assert!(!query.matches(&old, ctx));
  }

  #[test]
  fn show_completed_keeps_deleted_out() {
    let now = Utc::now();
    let adjusted =
      adjust_for_flags_and_sort(
        "+PENDING",
        SortFlags(
          SortFlags::SHOW_COMPLETED
        ),
        SortOrder::Auto,
        now
      );
    assert_eq!(
      adjusted,
      "-DELETED ORDER BY smart"
    );
  }

  #[test]
  fn tag_restriction_is_injected_once() {
    let once = inject_tag_restriction(
      "tagid:4 or +OVERDUE ORDER BY due",
      "Home"
    );
    assert_eq!(
      once,
      "( tagid:4 or +OVERDUE ) \
       tag:\"Home\" ORDER BY due"
    );
    assert_eq!(
      inject_tag_restriction(
        &once, "Home"
      ),
      once
    );
  }

  #[test]
  fn tag_name_resolves_through_context()
  {
    let now = Utc::now();
    let tags = vec![Tag {
      id:   9,
      name: "Two words".to_string()
    }];
    let mut task = TaskRecord::new(
      1,
      "tagged".to_string(),
      now
    );
    task.tags = vec![9];

    let query = Query::parse(
      "tag:\"Two words\" +PENDING",
      now
    )
    .unwrap();
    assert!(query.matches(
      &task,
      EvalContext {
        now,
        tags: &tags
      }
    ));
    assert!(!query.matches(
      &task,
      EvalContext {
        now,
        tags: &[]
      }
    ));
  }

  #[test]
  fn quoted_tag_names_survive_injection()
  {
    let now = Utc::now();
    let name = r#"2" pipes \ fittings"#;
    let tags = vec![Tag {
      id:   42,
      name: name.to_string()
    }];
    let mut task = TaskRecord::new(
      1,
      "order parts".to_string(),
      now
    );
    task.tags = vec![42];

    let text = inject_tag_restriction(
      "+PENDING ORDER BY widget",
      name
    );
    assert_eq!(
      text,
      r#"( +PENDING ) tag:"2\" pipes \\ fittings" ORDER BY widget"#
    );
    let query =
      Query::parse(&text, now).unwrap();
    assert!(query.matches(
      &task,
      EvalContext {
        now,
        tags: &tags
      }
    ));
  }

  #[test]
  fn quoted_connectives_are_search_text()
  {
    let now = Utc::now();
    let ctx = EvalContext {
      now,
      tags: &[]
    };
    let task = TaskRecord::new(
      1,
      "this or that".to_string(),
      now
    );
    let other = TaskRecord::new(
      2,
      "neither".to_string(),
      now
    );

    let query = Query::parse(
      "\"this or\" +PENDING",
      now
    )
    .unwrap();
    assert!(query.matches(&task, ctx));
    assert!(!query.matches(&other, ctx));

    let either = Query::parse(
      "neither OR ( that and this )",
      now
    )
    .unwrap();
    assert!(either.matches(&task, ctx));
    assert!(either.matches(&other, ctx));
  }

  #[test]
  fn sort_puts_completed_last() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 16, 5, 0, 0
      )
      .unwrap();
    let mut done = TaskRecord::new(
      1,
      "a done".to_string(),
      now
    );
    done.completed = Some(now);
    done.due =
      Some(now - Duration::days(3));
    let mut later = TaskRecord::new(
      2,
      "b later".to_string(),
      now
    );
    later.due =
      Some(now + Duration::days(3));
    let mut sooner = TaskRecord::new(
      3,
      "c sooner".to_string(),
      now
    );
    sooner.due =
      Some(now + Duration::days(1));
    let undated = TaskRecord::new(
      4,
      "d undated".to_string(),
      now
    );

    let query = Query::parse(
      "ORDER BY widget",
      now
    )
    .unwrap();
    let mut tasks =
      vec![done, undated, later, sooner];
    query.sort(&mut tasks);

    let ids: Vec<i64> =
      tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![3, 2, 4, 1]);
  }

  #[test]
  fn rejects_unknown_sort_keys_and_quotes()
  {
    let now = Utc::now();
    assert!(
      Query::parse(
        "+PENDING ORDER BY colour",
        now
      )
      .is_err()
    );
    assert!(
      Query::parse("tag:\"open", now)
        .is_err()
    );
    assert!(
      Query::parse("( +PENDING", now)
        .is_err()
    );
    assert!(
      Query::parse("+PENDING or", now)
        .is_err()
    );
    assert!(
      Query::parse("+PENDING )", now)
        .is_err()
    );
    assert!(
      Query::parse(
        "due.before:+9999999999999d",
        now
      )
      .is_err()
    );
  }
}
