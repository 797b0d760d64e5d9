//! Compiler for `.mod` programs, the line language run by the reference
//! engine.

mod preprocessor;
mod statements;
mod types;

pub use preprocessor::split_statements;
pub use statements::{is_name, parse_operand, parse_statement};
pub use types::{Binding, Block, Instruction, Op, Operand, Statement, StatementKind};

use crate::error::ParseError;

/// Compile a whole program into its module block. Functions become nested
/// blocks of the block they are declared in.
pub fn compile(source: &str) -> Result<Block, ParseError> {
    let mut module = Block::module(source.lines().count() as u32);
    let mut open: Vec<Block> = Vec::new();

    for statement in split_statements(source) {
        let location = statement.location;
        match parse_statement(&statement)? {
            StatementKind::Function { name, params } => {
                open.push(Block::function(name, params, location));
            }
            StatementKind::End => {
                let Some(mut function) = open.pop() else {
                    return Err(ParseError::UnmatchedEnd {
                        line: location.line,
                    });
                };
                function.push(Op::Return, location);
                function.line_count = location.line - function.start.line + 1;
                let parent = open.last_mut().unwrap_or(&mut module);
                if parent.functions.iter().any(|f| f.name == function.name) {
                    return Err(ParseError::DuplicateFunction {
                        line: function.start.line,
                        name: function.name.unwrap_or_default(),
                    });
                }
                parent.functions.push(function);
            }
            StatementKind::Assign {
                binding,
                name,
                value,
            } => {
                let block = open.last_mut().unwrap_or(&mut module);
                block.push(Op::Load(value), location);
                block.push(Op::Store { binding, name }, location);
            }
            StatementKind::Call { name, args } => {
                open.last_mut()
                    .unwrap_or(&mut module)
                    .push(Op::Call { name, args }, location);
            }
            StatementKind::Defer { name, args } => {
                open.last_mut()
                    .unwrap_or(&mut module)
                    .push(Op::Defer { name, args }, location);
            }
            StatementKind::Print(operand) => {
                open.last_mut()
                    .unwrap_or(&mut module)
                    .push(Op::Print(operand), location);
            }
        }
    }

    if let Some(function) = open.pop() {
        return Err(ParseError::UnclosedFunction {
            line: function.start.line,
            name: function.name.unwrap_or_default(),
        });
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Location;

    #[test]
    fn functions_nest_and_end_in_return() {
        let source = "let a = 1\nfunction f x\n  print x\nend\ncall f a\n";
        let module = compile(source).unwrap();

        assert_eq!(module.line_count, 5);
        assert_eq!(module.instructions.len(), 3);
        assert_eq!(module.instructions[0].location, module.instructions[1].location);
        assert!(!module.instructions.iter().any(|i| i.op == Op::Return));

        let f = &module.functions[0];
        assert_eq!(f.name.as_deref(), Some("f"));
        assert_eq!(f.start, Location { line: 2, column: 0 });
        assert_eq!(f.line_count, 3);
        assert_eq!(f.instructions.last().map(|i| &i.op), Some(&Op::Return));
        assert_eq!(f.instructions.last().map(|i| i.location.line), Some(4));
    }

    #[test]
    fn declared_names_list_params_then_lets() {
        let module = compile("function f a b\nlet c = 1\nlet a = 2\nend").unwrap();
        assert_eq!(module.functions[0].declared_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unbalanced_blocks_are_rejected() {
        assert_eq!(compile("end"), Err(ParseError::UnmatchedEnd { line: 1 }));
        assert_eq!(
            compile("print 1\nfunction g\nprint 2"),
            Err(ParseError::UnclosedFunction {
                line: 2,
                name: "g".to_string()
            })
        );
        assert!(matches!(
            compile("function g\nend\nfunction g\nend"),
            Err(ParseError::DuplicateFunction { line: 3, .. })
        ));
    }
}
