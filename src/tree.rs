//! The n-ary tree shared by the parser and the evaluator.
//!
//! A [`Tree`] is an optional [`Node`] plus an ordered list of children. Trees with a node
//! are leaves (literals and variables) or forms (keyword or call nodes with arguments);
//! trees without a node are sequence containers such as a parsed program or a plain
//! data list. Containers are never empty.
//!
//! Trees own their children, so [`Tree::deep_copy`] (and `Clone`) produce structurally
//! independent copies. The evaluator relies on this whenever a bound definition is
//! substituted at a use site.
//!
//! Helpers such as [`num`], [`text`], [`var`] and [`form`] build trees tersely in tests.

use std::collections::BTreeSet;
use std::fmt;

use crate::token::Keyword;

/// Node payload of a [`Tree`].
#[derive(Clone)]
pub enum Node {
    Number(f64),
    Text(String),
    /// Reference to a binding. `cache` carries the bound tree for display only; it is
    /// never consulted during evaluation and is ignored by equality.
    Variable {
        name: String,
        cache: Option<Box<Tree>>,
    },
    /// Operator or special form. Call nodes carry the callee name.
    Keyword { op: Keyword, name: Option<String> },
}

impl Node {
    pub fn variable(name: impl Into<String>) -> Self {
        Node::Variable {
            name: name.into(),
            cache: None,
        }
    }

    pub fn keyword(op: Keyword) -> Self {
        Node::Keyword { op, name: None }
    }

    pub fn call(name: impl Into<String>) -> Self {
        Node::Keyword {
            op: Keyword::Call,
            name: Some(name.into()),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Number(a), Node::Number(b)) => a == b,
            (Node::Text(a), Node::Text(b)) => a == b,
            (Node::Variable { name: a, .. }, Node::Variable { name: b, .. }) => a == b,
            (
                Node::Keyword { op: op1, name: n1 },
                Node::Keyword { op: op2, name: n2 },
            ) => op1 == op2 && n1 == n2,
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => write!(f, "Number({n})"),
            Node::Text(s) => write!(f, "Text({s:?})"),
            Node::Variable { name, .. } => write!(f, "Variable({name})"),
            Node::Keyword {
                op: Keyword::Call,
                name: Some(name),
            } => write!(f, "Call({name})"),
            Node::Keyword { op, .. } => write!(f, "Keyword({op})"),
        }
    }
}

/// N-ary tree of nodes.
#[derive(Clone, PartialEq, Default)]
pub struct Tree {
    pub node: Option<Node>,
    pub children: Vec<Tree>,
}

impl Tree {
    pub fn leaf(node: Node) -> Self {
        Tree {
            node: Some(node),
            children: Vec::new(),
        }
    }

    pub fn with_children(node: Node, children: Vec<Tree>) -> Self {
        Tree {
            node: Some(node),
            children,
        }
    }

    /// A valueless sequence container
    pub fn container(children: Vec<Tree>) -> Self {
        Tree {
            node: None,
            children,
        }
    }

    /// Append a new leaf child and return it so that further children can be appended to it.
    pub fn append(&mut self, node: Node) -> &mut Tree {
        self.push(Tree::leaf(node))
    }

    /// Append an existing subtree and return it
    pub fn push(&mut self, child: Tree) -> &mut Tree {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Descend through the last child `depth` times.
    /// Returns `None` if some level on the way has no children.
    pub fn walk(&self, depth: usize) -> Option<&Tree> {
        if depth == 0 {
            return Some(self);
        }
        self.children.last()?.walk(depth - 1)
    }

    /// Mutable form of [`Tree::walk`]
    pub fn walk_mut(&mut self, depth: usize) -> Option<&mut Tree> {
        if depth == 0 {
            return Some(self);
        }
        self.children.last_mut()?.walk_mut(depth - 1)
    }

    /// Structurally independent copy
    pub fn deep_copy(&self) -> Tree {
        self.clone()
    }

    pub fn is_leaf(&self) -> bool {
        self.node.is_some() && self.children.is_empty()
    }

    pub fn number(&self) -> Option<f64> {
        match (&self.node, self.children.is_empty()) {
            (Some(Node::Number(n)), true) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match (&self.node, self.children.is_empty()) {
            (Some(Node::Text(s)), true) => Some(s),
            _ => None,
        }
    }

    pub fn variable_name(&self) -> Option<&str> {
        match &self.node {
            Some(Node::Variable { name, .. }) => Some(name),
            _ => None,
        }
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match &self.node {
            Some(Node::Keyword { op, .. }) => Some(*op),
            _ => None,
        }
    }

    /// Unwrap a container holding exactly one child, such as a single-form program
    pub fn into_single(self) -> Tree {
        match self {
            Tree {
                node: None,
                mut children,
            } if children.len() == 1 => children.remove(0),
            other => other,
        }
    }

    /// Every variable and callee name referenced anywhere in this tree
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        match &self.node {
            Some(Node::Variable { name, .. })
            | Some(Node::Keyword {
                name: Some(name), ..
            }) => {
                names.insert(name.clone());
            }
            _ => {}
        }
        for child in &self.children {
            child.collect_names(names);
        }
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{node:?}")?,
            None => write!(f, "Container")?,
        }
        if !self.children.is_empty() {
            write!(f, "[")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{child:?}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

fn write_text(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

/// Parenthesized source rendering
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = match &self.node {
            Some(Node::Number(n)) if self.children.is_empty() => return write!(f, "{n}"),
            Some(Node::Text(s)) if self.children.is_empty() => return write_text(f, s),
            Some(Node::Variable { name, cache }) => {
                return match cache {
                    Some(bound) => write!(f, "(: {name} {bound})"),
                    None => write!(f, "{name}"),
                };
            }
            Some(Node::Number(n)) => Some(n.to_string()),
            Some(Node::Text(s)) => Some(format!("{s:?}")),
            Some(Node::Keyword {
                name: Some(name), ..
            }) => Some(name.clone()),
            Some(Node::Keyword { op, .. }) => Some(op.spelling().to_owned()),
            None => None,
        };

        write!(f, "(")?;
        let mut first = true;
        if let Some(head) = head {
            write!(f, "{head}")?;
            first = false;
        }
        for child in &self.children {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{child}")?;
            first = false;
        }
        write!(f, ")")
    }
}

impl From<f64> for Tree {
    fn from(n: f64) -> Self {
        Tree::leaf(Node::Number(n))
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Tree {
            fn from(n: $int_type) -> Self {
                Tree::leaf(Node::Number(f64::from(n)))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl From<&str> for Tree {
    fn from(s: &str) -> Self {
        Tree::leaf(Node::Text(s.to_owned()))
    }
}

impl From<String> for Tree {
    fn from(s: String) -> Self {
        Tree::leaf(Node::Text(s))
    }
}

/// Number leaf
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn num<T: Into<f64>>(n: T) -> Tree {
    Tree::leaf(Node::Number(n.into()))
}

/// Text leaf
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn text<S: AsRef<str>>(s: S) -> Tree {
    Tree::leaf(Node::Text(s.as_ref().to_owned()))
}

/// Variable leaf
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn var<S: AsRef<str>>(name: S) -> Tree {
    Tree::leaf(Node::variable(name.as_ref()))
}

/// Keyword form with children
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn form<const N: usize>(op: Keyword, children: [Tree; N]) -> Tree {
    Tree::with_children(Node::keyword(op), children.into())
}

/// Call form with arguments
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn call<const N: usize>(name: &str, args: [Tree; N]) -> Tree {
    Tree::with_children(Node::call(name), args.into())
}

/// Valueless container
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn container<const N: usize>(children: [Tree; N]) -> Tree {
    Tree::container(children.into())
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    #[test]
    fn test_append_returns_new_child() {
        let mut root = Tree::default();
        let add = root.append(Node::keyword(Keyword::Add));
        add.append(Node::Number(1.0));
        add.append(Node::Number(2.0));

        assert_eq!(
            root,
            container([form(Keyword::Add, [num(1), num(2)])])
        );
    }

    #[test]
    fn test_walk_follows_last_child() {
        let tree = container([
            form(Keyword::Add, [num(1), num(2)]),
            form(Keyword::Mul, [num(3), form(Keyword::Sub, [num(4)])]),
        ]);

        assert_eq!(tree.walk(0), Some(&tree));
        assert_eq!(tree.walk(1).and_then(Tree::keyword), Some(Keyword::Mul));
        assert_eq!(tree.walk(2).and_then(Tree::keyword), Some(Keyword::Sub));
        assert_eq!(tree.walk(3).and_then(Tree::number), Some(4.0));
        assert_eq!(tree.walk(4), None);

        let mut tree = tree;
        tree.walk_mut(2).unwrap().append(Node::Number(5.0));
        assert_eq!(tree.to_string(), "((+ 1 2) (* 3 (- 4 5)))");
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original = form(Keyword::Add, [num(1), form(Keyword::Mul, [num(2), var("x")])]);
        let mut copy = original.deep_copy();
        copy.walk_mut(1).unwrap().children[0] = num(99);
        copy.children.push(num(3));

        assert_eq!(original.to_string(), "(+ 1 (* 2 x))");
        assert_eq!(copy.to_string(), "(+ 1 (* 99 x) 3)");
    }

    #[test]
    fn test_display_round_trips_source_forms() {
        let test_cases = vec![
            (num(3), "3"),
            (num(2.5), "2.5"),
            (num(-0.5), "-0.5"),
            (text("a \"q\"\n"), r#""a \"q\"\n""#),
            (var("x"), "x"),
            (form(Keyword::Add, [num(1), num(2)]), "(+ 1 2)"),
            (form(Keyword::List, []), "(list)"),
            (call("fact", [num(5)]), "(fact 5)"),
            (container([num(1), num(2)]), "(1 2)"),
            (
                form(
                    Keyword::Assign,
                    [
                        var("sq"),
                        form(
                            Keyword::Function,
                            [
                                form(Keyword::List, [var("n")]),
                                form(Keyword::Mul, [var("n"), var("n")]),
                            ],
                        ),
                    ],
                ),
                "(: sq (lambda (list n) (* n n)))",
            ),
            (
                Tree::leaf(Node::Variable {
                    name: "x".into(),
                    cache: Some(Box::new(num(5))),
                }),
                "(: x 5)",
            ),
        ];

        for (i, (tree, expected)) in test_cases.iter().enumerate() {
            assert_eq!(tree.to_string(), *expected, "Display test #{}", i + 1);
        }
    }

    #[test]
    fn test_variable_cache_ignored_by_equality() {
        let cached = Tree::leaf(Node::Variable {
            name: "x".into(),
            cache: Some(Box::new(num(5))),
        });
        assert_eq!(cached, var("x"));
        assert_ne!(var("x"), var("y"));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(num(4).number(), Some(4.0));
        assert_eq!(text("hi").text(), Some("hi"));
        assert_eq!(var("x").variable_name(), Some("x"));
        assert_eq!(call("f", []).keyword(), Some(Keyword::Call));
        assert!(num(1).is_leaf());
        assert!(!container([num(1)]).is_leaf());
        assert_eq!(form(Keyword::Add, [num(1)]).number(), None);
        assert_eq!(container([num(7)]).into_single(), num(7));
        assert_eq!(
            container([num(1), num(2)]).into_single(),
            container([num(1), num(2)])
        );
    }

    #[test]
    fn test_referenced_names() {
        let tree = form(
            Keyword::Cmp,
            [
                form(Keyword::Eq, [var("n"), num(0)]),
                num(1),
                form(Keyword::Mul, [var("n"), call("fact", [var("m")])]),
            ],
        );
        let names: Vec<String> = tree.referenced_names().into_iter().collect();
        assert_eq!(names, vec!["fact", "m", "n"]);
    }

    #[test]
    fn test_from_conversions() {
        let test_cases: Vec<(Tree, Tree)> = vec![
            (Tree::from(42), num(42)),
            (Tree::from(2.5), num(2.5)),
            (Tree::from(255u8), num(255)),
            (Tree::from(-7i16), num(-7)),
            (Tree::from("s"), text("s")),
            (Tree::from(String::from("s")), text("s")),
        ];
        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "From test #{}", i + 1);
        }
    }
}
