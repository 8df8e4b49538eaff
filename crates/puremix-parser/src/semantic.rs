//! Semantic annotation pass.
//!
//! Walks a parsed tree and fills in `Metadata` without changing its shape:
//! every node gets a `Scope`, arrow functions get a fresh context id, and
//! nodes whose result type is known from syntax alone get a `DataType`.

use crate::ast::{DataType, Node, NodeKind, Scope};

/// Annotate a tree. The returned tree has the same shape as the input.
pub fn analyze(mut root: Node) -> Node {
    let mut analyzer = Analyzer { next_context: 0 };
    analyzer.visit(&mut root, &Scope::Template);
    root
}

struct Analyzer {
    next_context: usize,
}

impl Analyzer {
    fn visit(&mut self, node: &mut Node, scope: &Scope) {
        node.meta.scope = Some(scope.clone());

        if let NodeKind::ArrowFunction { params, .. } = &node.kind {
            let inner = Scope::Callback {
                params: params.clone(),
            };
            node.meta.context_id = Some(self.next_context);
            self.next_context += 1;
            for child in node.children_mut() {
                self.visit(child, &inner);
            }
        } else {
            for child in node.children_mut() {
                self.visit(child, scope);
            }
        }

        node.meta.data_type = infer(node);
    }
}

fn infer(node: &Node) -> Option<DataType> {
    match &node.kind {
        NodeKind::HtmlElement(_) => Some(DataType::Html),
        NodeKind::Text(_) | NodeKind::String(_) | NodeKind::TemplateLiteral(_) => {
            Some(DataType::Text)
        }
        NodeKind::Number(_) => Some(DataType::Number),
        NodeKind::Conditional {
            consequent,
            alternate,
            ..
        } => {
            let html = |n: &Node| n.meta.data_type == Some(DataType::Html);
            if html(consequent) || html(alternate) {
                Some(DataType::Html)
            } else {
                Some(DataType::Text)
            }
        }
        NodeKind::MemberAccess {
            property, computed, ..
        } => match &property.kind {
            NodeKind::Identifier(name) if !computed && name == "length" => Some(DataType::Number),
            _ => Some(DataType::Value),
        },
        NodeKind::ArrayMap { callback, .. } => match &callback.kind {
            NodeKind::ArrowFunction { body, .. } if body.meta.data_type == Some(DataType::Html) => {
                Some(DataType::Html)
            }
            _ => Some(DataType::Array),
        },
        NodeKind::ArrayFilter { .. } => Some(DataType::Array),
        NodeKind::Binary { .. } => Some(DataType::Value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn analyzed_expr(source: &str) -> Node {
        let program = analyze(Parser::parse(source).unwrap());
        let NodeKind::Program(mut nodes) = program.kind else {
            panic!("Expected Program");
        };
        match nodes.remove(0).kind {
            NodeKind::Expression(inner) => *inner,
            other => panic!("Expected Expression, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_preserved() {
        let source = "{items.filter(i => i.on).map(i => <li>{i.n}</li>)}";
        let parsed = Parser::parse(source).unwrap();
        let count = parsed.count();
        let analyzed = analyze(parsed);
        assert_eq!(analyzed.count(), count);
    }

    #[test]
    fn test_template_scope_everywhere_outside_callbacks() {
        let node = analyzed_expr("{a ? b : c}");
        assert_eq!(node.meta.scope, Some(Scope::Template));
        for child in node.children() {
            assert_eq!(child.meta.scope, Some(Scope::Template));
        }
    }

    #[test]
    fn test_callback_body_gets_callback_scope() {
        let node = analyzed_expr("{items.map(item => item.name)}");
        let NodeKind::ArrayMap { array, callback } = &node.kind else {
            panic!("Expected ArrayMap");
        };
        assert_eq!(array.meta.scope, Some(Scope::Template));
        assert_eq!(callback.meta.context_id, Some(0));
        let NodeKind::ArrowFunction { body, .. } = &callback.kind else {
            panic!("Expected ArrowFunction");
        };
        assert_eq!(
            body.meta.scope,
            Some(Scope::Callback {
                params: vec!["item".into()]
            })
        );
    }

    #[test]
    fn test_context_ids_are_distinct() {
        let node = analyzed_expr("{items.filter(i => i.on).map(j => j.n)}");
        let NodeKind::ArrayMap { array, callback } = &node.kind else {
            panic!("Expected ArrayMap");
        };
        let NodeKind::ArrayFilter {
            callback: inner, ..
        } = &array.kind
        else {
            panic!("Expected ArrayFilter");
        };
        assert_eq!(inner.meta.context_id, Some(0));
        assert_eq!(callback.meta.context_id, Some(1));
    }

    #[test]
    fn test_conditional_with_html_branch_is_html() {
        let node = analyzed_expr("{ok ? <b>x</b> : 'y'}");
        assert_eq!(node.meta.data_type, Some(DataType::Html));
    }

    #[test]
    fn test_conditional_with_text_branches_is_text() {
        let node = analyzed_expr("{ok ? 'x' : 'y'}");
        assert_eq!(node.meta.data_type, Some(DataType::Text));
    }

    #[test]
    fn test_length_is_number() {
        let node = analyzed_expr("{items.length}");
        assert_eq!(node.meta.data_type, Some(DataType::Number));
    }

    #[test]
    fn test_map_with_html_body_is_html() {
        let node = analyzed_expr("{items.map(i => <li>{i}</li>)}");
        assert_eq!(node.meta.data_type, Some(DataType::Html));
    }
}
