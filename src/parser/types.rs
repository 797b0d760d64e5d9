use crate::protocol::Location;

/// One `;`-separated statement with the position of its first character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub location: Location,
}

/// A value as written in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(serde_json::Value),
    Name(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Declare in the current frame.
    Let,
    /// Assign an existing local, falling back to a global.
    Set,
    /// Define a property of the global object.
    Global,
}

/// Parsed form of a single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Assign {
        binding: Binding,
        name: String,
        value: Operand,
    },
    Call { name: String, args: Vec<Operand> },
    Defer { name: String, args: Vec<Operand> },
    Print(Operand),
    Function { name: String, params: Vec<String> },
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Evaluate an operand into the frame's accumulator.
    Load(Operand),
    /// Move the accumulator into a binding.
    Store { binding: Binding, name: String },
    Call { name: String, args: Vec<Operand> },
    Defer { name: String, args: Vec<Operand> },
    Print(Operand),
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub location: Location,
}

/// A compiled module or function body. Offsets into a block are indices
/// into `instructions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// `None` for the module itself.
    pub name: Option<String>,
    pub params: Vec<String>,
    pub start: Location,
    pub line_count: u32,
    pub instructions: Vec<Instruction>,
    pub functions: Vec<Block>,
}

impl Block {
    pub fn module(line_count: u32) -> Self {
        Self {
            name: None,
            params: Vec::new(),
            start: Location { line: 1, column: 0 },
            line_count,
            instructions: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn function(name: String, params: Vec<String>, start: Location) -> Self {
        Self {
            name: Some(name),
            params,
            start,
            line_count: 1,
            instructions: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn push(&mut self, op: Op, location: Location) {
        self.instructions.push(Instruction { op, location });
    }

    /// Parameters followed by every `let` name, in first-seen order.
    pub fn declared_names(&self) -> Vec<String> {
        let mut names = self.params.clone();
        for instruction in &self.instructions {
            if let Op::Store {
                binding: Binding::Let,
                name,
            } = &instruction.op
            {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}
