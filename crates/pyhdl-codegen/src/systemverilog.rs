//! SystemVerilog code generation from MIR
//!
//! Emits one synthesizable module per MIR descriptor. Emission order
//! within a module: port list, `localparam`s, enum typedefs, signal
//! declarations, intermediate wires, submodule instantiations, the
//! combinational block, then the sequential blocks. Every binary
//! expression is parenthesized; `unique case` always carries a default.

use pyhdl_mir::mir::{
    BinaryOp, BoolOp, CompareOp, Direction, Expression, LValue, Mir, Module, Shape, Statement,
    UnaryOp,
};

/// Blocking (`=`) in combinational blocks, non-blocking (`<=`) in
/// sequential blocks
#[derive(Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Blocking,
    NonBlocking,
}

impl AssignOp {
    fn as_str(self) -> &'static str {
        match self {
            AssignOp::Blocking => "=",
            AssignOp::NonBlocking => "<=",
        }
    }
}

/// Generate `(module_name, source_text)` pairs for every module of a
/// design, in emission order
pub fn generate_modules(mir: &Mir) -> Vec<(String, String)> {
    mir.modules
        .iter()
        .map(|module| (module.name.clone(), generate_module(module)))
        .collect()
}

/// Generate a single SystemVerilog module
pub fn generate_module(module: &Module) -> String {
    let mut sv = String::new();

    // Module header with port list
    if module.ports.is_empty() {
        sv.push_str(&format!("module {} ();\n", module.name));
    } else {
        sv.push_str(&format!("module {} (\n", module.name));
        let ports: Vec<String> = module
            .ports
            .iter()
            .map(|port| {
                let direction = match port.direction {
                    Direction::Input => "input",
                    Direction::Output => "output",
                };
                format!("    {}", format_decl(direction, &port.name, &port.shape))
            })
            .collect();
        sv.push_str(&ports.join(",\n"));
        sv.push_str("\n);\n");
    }

    // Parameters known after monomorphization
    for (name, value) in &module.parameters {
        sv.push_str(&format!("    localparam {} = {};\n", name, value));
    }

    // Enum typedefs precede the state declarations that use them
    for (name, enum_type) in &module.enums {
        let members: Vec<String> = enum_type
            .members
            .iter()
            .map(|(member, value)| format!("{}={}", member, value))
            .collect();
        sv.push_str(&format!(
            "    typedef enum logic [{}:0] {{ {} }} {}_t;\n",
            enum_type.width - 1,
            members.join(", "),
            name
        ));
    }

    // Internal signals, then auto-declared intermediate wires
    for signal in &module.signals {
        sv.push_str(&format!("    {};\n", format_decl("", &signal.name, &signal.shape)));
    }
    for wire in &module.wires {
        sv.push_str(&format!("    {};\n", format_decl("", &wire.name, &wire.shape)));
    }

    // Submodule instantiations
    for instance in &module.instances {
        let connections: Vec<String> = instance
            .connections
            .iter()
            .map(|(port, connection)| match connection {
                Some(expr) => format!(".{}({})", port, format_expression(expr)),
                None => format!(".{}()", port),
            })
            .collect();
        sv.push_str(&format!(
            "    {} {} ({});\n",
            instance.module,
            instance.name,
            connections.join(", ")
        ));
    }

    // One always_comb holds every combinational statement, source order
    if !module.comb.is_empty() {
        sv.push_str("    always_comb begin\n");
        for stmt in &module.comb {
            sv.push_str(&emit_statement(stmt, AssignOp::Blocking, 2));
        }
        sv.push_str("    end\n");
    }

    // One always_ff per distinct edge tuple
    for block in &module.seq_blocks {
        let edges: Vec<String> = block.edges.iter().map(|e| e.to_string()).collect();
        sv.push_str(&format!("    always_ff @({}) begin\n", edges.join(" or ")));
        for stmt in &block.body {
            sv.push_str(&emit_statement(stmt, AssignOp::NonBlocking, 2));
        }
        sv.push_str("    end\n");
    }

    sv.push_str("endmodule\n");
    sv
}

/// Format a port or signal declaration, without the trailing `;`
fn format_decl(direction: &str, name: &str, shape: &Shape) -> String {
    let prefix = if direction.is_empty() {
        String::new()
    } else {
        format!("{} ", direction)
    };
    match shape {
        Shape::Vector(1) => format!("{}logic {}", prefix, name),
        Shape::Vector(width) => format!("{}logic [{}:0] {}", prefix, width - 1, name),
        Shape::Memory { depth, width } => format!(
            "{}logic [{}:0] {} [0:{}]",
            prefix,
            width - 1,
            name,
            depth - 1
        ),
        Shape::Enum(enum_name) => format!("{}{}_t {}", prefix, enum_name, name),
    }
}

/// Generate one statement at the given indent level
fn emit_statement(stmt: &Statement, op: AssignOp, indent_level: usize) -> String {
    let indent = "    ".repeat(indent_level);
    match stmt {
        Statement::Assign { lhs, rhs } => format!(
            "{}{} {} {};\n",
            indent,
            format_lvalue(lhs),
            op.as_str(),
            format_expression(rhs)
        ),
        Statement::If { .. } => {
            let mut sv = String::new();
            emit_if(stmt, op, indent_level, &mut sv);
            sv
        }
        Statement::Case {
            subject,
            arms,
            default,
        } => {
            let mut sv = format!("{}unique case ({})\n", indent, format_expression(subject));
            for arm in arms {
                sv.push_str(&format!(
                    "{}    {}: begin\n",
                    indent,
                    format_expression(&arm.label)
                ));
                for s in &arm.body {
                    sv.push_str(&emit_statement(s, op, indent_level + 2));
                }
                sv.push_str(&format!("{}    end\n", indent));
            }
            if default.is_empty() {
                sv.push_str(&format!("{}    default: ;\n", indent));
            } else {
                sv.push_str(&format!("{}    default: begin\n", indent));
                for s in default {
                    sv.push_str(&emit_statement(s, op, indent_level + 2));
                }
                sv.push_str(&format!("{}    end\n", indent));
            }
            sv.push_str(&format!("{}endcase\n", indent));
            sv
        }
    }
}

/// `if`/`elif`/`else` chains flatten into `if … else if … else`
fn emit_if(stmt: &Statement, op: AssignOp, indent_level: usize, sv: &mut String) {
    let indent = "    ".repeat(indent_level);
    if let Statement::If {
        cond,
        then_body,
        else_body,
    } = stmt
    {
        sv.push_str(&format!(
            "{}if ({}) begin\n",
            indent,
            format_expression(cond)
        ));
        for s in then_body {
            sv.push_str(&emit_statement(s, op, indent_level + 1));
        }
        sv.push_str(&format!("{}end", indent));

        let mut else_ref: &[Statement] = else_body;
        loop {
            if else_ref.is_empty() {
                break;
            }
            if else_ref.len() == 1 {
                if let Statement::If {
                    cond,
                    then_body,
                    else_body,
                } = &else_ref[0]
                {
                    sv.push_str(&format!(" else if ({}) begin\n", format_expression(cond)));
                    for s in then_body {
                        sv.push_str(&emit_statement(s, op, indent_level + 1));
                    }
                    sv.push_str(&format!("{}end", indent));
                    else_ref = else_body;
                    continue;
                }
            }
            sv.push_str(" else begin\n");
            for s in else_ref {
                sv.push_str(&emit_statement(s, op, indent_level + 1));
            }
            sv.push_str(&format!("{}end", indent));
            break;
        }
        sv.push('\n');
    }
}

/// Format an assignment target
fn format_lvalue(lvalue: &LValue) -> String {
    match lvalue {
        LValue::Name(name) => name.clone(),
        LValue::Bit { base, index } | LValue::Element { base, index } => {
            format!("{}[{}]", base, format_expression(index))
        }
        LValue::Slice { base, hi, lo } => format!("{}[{}:{}]", base, hi, lo),
    }
}

/// Format an expression; every binary form is parenthesized
fn format_expression(expr: &Expression) -> String {
    match expr {
        Expression::Literal { value, width } => match width {
            Some(w) if *value >= 0 => format!("{}'d{}", w, value),
            _ => value.to_string(),
        },
        Expression::Name(name) => name.clone(),
        Expression::EnumMember(member) => member.clone(),
        Expression::Unary { op, operand } => {
            let op = match op {
                UnaryOp::BitwiseNot => "~",
                UnaryOp::Not => "!",
                UnaryOp::Negate => "-",
            };
            format!("({}{})", op, format_expression(operand))
        }
        Expression::Binary { op, left, right } => format!(
            "({} {} {})",
            format_expression(left),
            format_binary_op(op),
            format_expression(right)
        ),
        Expression::Bool { op, values } => {
            let op = match op {
                BoolOp::And => " && ",
                BoolOp::Or => " || ",
            };
            let parts: Vec<String> = values.iter().map(format_expression).collect();
            format!("({})", parts.join(op))
        }
        Expression::Compare { op, left, right } => format!(
            "({} {} {})",
            format_expression(left),
            format_compare_op(op),
            format_expression(right)
        ),
        Expression::Ternary {
            cond,
            then_expr,
            else_expr,
        } => format!(
            "({} ? {} : {})",
            format_expression(cond),
            format_expression(then_expr),
            format_expression(else_expr)
        ),
        Expression::Concat(parts) => {
            let parts: Vec<String> = parts.iter().map(format_expression).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Expression::Bit { base, index } | Expression::Element { base, index } => {
            format!("{}[{}]", base, format_expression(index))
        }
        Expression::Slice { base, hi, lo } => format!("{}[{}:{}]", base, hi, lo),
    }
}

fn format_binary_op(op: &BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
        BinaryOp::BitwiseAnd => "&",
        BinaryOp::BitwiseOr => "|",
        BinaryOp::BitwiseXor => "^",
        BinaryOp::LeftShift => "<<",
        BinaryOp::RightShift => ">>",
    }
}

fn format_compare_op(op: &CompareOp) -> &'static str {
    match op {
        CompareOp::Equal => "==",
        CompareOp::NotEqual => "!=",
        CompareOp::Less => "<",
        CompareOp::LessEqual => "<=",
        CompareOp::Greater => ">",
        CompareOp::GreaterEqual => ">=",
    }
}
