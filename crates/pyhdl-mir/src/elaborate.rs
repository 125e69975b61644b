//! Elaboration: PyHDL AST → MIR
//!
//! Walks the collected module classes, evaluates every compile-time
//! expression, unrolls static loops, monomorphizes parameterized templates
//! per distinct parameter tuple, classifies each assignment into its
//! combinational or edge-triggered bucket, and builds MIR module
//! descriptors ready for emission.
//!
//! Errors abort the module being elaborated; independent modules in the
//! same compilation keep going.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use pyhdl_frontend::ast::{self, Assign, ClassDef, Expr, Index, Pattern, SourceFile, Stmt};
use tracing::debug;

use crate::const_eval::ConstEvaluator;
use crate::diagnostics::{Diagnostic, DiagnosticKind, ElabError};
use crate::mir::{
    min_width, BinaryOp, BoolOp, CaseArm, CompareOp, Direction, Edge, EdgePolarity, EnumType,
    Expression, Instance, LValue, Module, Port, SeqBlock, Shape, Signal, Statement, UnaryOp,
};

/// Names supplied by the host shim; never free, never hardware
const BUILTINS: &[&str] = &[
    "bit", "In", "Out", "Module", "Enum", "range", "True", "False", "None",
];

/// Guard against runaway template self-instantiation
const MAX_INSTANTIATION_DEPTH: usize = 64;

type ElabResult<T> = Result<T, ElabError>;

/// One compilation unit: every pass shares this context, and a fresh one
/// is required per input file
#[derive(Default)]
pub struct Compilation {
    /// All `Module`-based classes by name, templates included
    classes: IndexMap<String, ModuleClass>,
    /// Emitted name → index into `modules`; doubles as the
    /// monomorphization cache
    emitted: IndexMap<String, usize>,
    /// Monomorphizations that already failed, so they are reported once
    mono_failed: IndexSet<String>,
    /// Current instantiation nesting depth
    depth: usize,
    /// Completed module descriptors in emission order
    pub modules: Vec<Module>,
    pub diagnostics: Vec<Diagnostic>,
    /// True once any module has failed
    pub failed: bool,
}

struct ModuleClass {
    /// Body statements, shared with recursive elaborations
    body: Rc<Vec<Stmt>>,
    /// Free names in first-appearance order; non-empty marks a template
    formals: Vec<String>,
}

/// Compile a parsed source file into MIR modules plus diagnostics
pub fn compile(file: &SourceFile) -> Compilation {
    let mut comp = Compilation::default();
    comp.collect(file);

    let order: Vec<(String, bool)> = comp
        .classes
        .iter()
        .map(|(name, class)| (name.clone(), class.formals.is_empty()))
        .collect();
    for (name, concrete) in order {
        if !concrete {
            debug!(template = %name, "deferring parameterized template until instantiation");
            continue;
        }
        if comp.emitted.contains_key(&name) {
            continue;
        }
        if let Err(err) = comp.elaborate(&name, name.clone(), &[]) {
            comp.report_error(&name, err);
        }
    }
    comp
}

impl Compilation {
    /// Scan top-level class definitions and register hardware modules
    fn collect(&mut self, file: &SourceFile) {
        let mut known: IndexSet<String> = IndexSet::new();
        for stmt in &file.body {
            if let Stmt::ClassDef(class) = stmt {
                if class.bases.iter().any(|b| b == "Module") {
                    known.insert(class.name.clone());
                }
            }
        }

        for stmt in &file.body {
            match stmt {
                Stmt::ClassDef(class) if class.bases.iter().any(|b| b == "Module") => {
                    if self.classes.contains_key(&class.name) {
                        self.diagnostics.push(
                            Diagnostic::error(
                                DiagnosticKind::DuplicateDefinition,
                                format!("module `{}` is defined more than once", class.name),
                            )
                            .with_module(&class.name)
                            .with_entity(&class.name),
                        );
                        self.failed = true;
                        continue;
                    }
                    let formals = free_names(class, &known);
                    self.classes.insert(
                        class.name.clone(),
                        ModuleClass {
                            body: Rc::new(class.body.clone()),
                            formals,
                        },
                    );
                }
                Stmt::Import => {}
                Stmt::ClassDef(class) => {
                    debug!(class = %class.name, "ignoring top-level class without a `Module` base")
                }
                _ => debug!("ignoring top-level statement"),
            }
        }
    }

    /// Elaborate `class_name` under `bindings` into a module called
    /// `emitted_name`. Memoized by emitted name.
    fn elaborate(
        &mut self,
        class_name: &str,
        emitted_name: String,
        bindings: &[(String, i64)],
    ) -> ElabResult<()> {
        if self.emitted.contains_key(&emitted_name) {
            return Ok(());
        }
        self.depth += 1;
        let result = self.elaborate_inner(class_name, emitted_name, bindings);
        self.depth -= 1;
        result
    }

    fn elaborate_inner(
        &mut self,
        class_name: &str,
        emitted_name: String,
        bindings: &[(String, i64)],
    ) -> ElabResult<()> {
        if self.depth > MAX_INSTANTIATION_DEPTH {
            return Err(ElabError::NonStaticExpression(format!(
                "instantiation of `{}` exceeds the supported nesting depth",
                class_name
            )));
        }
        let body = self
            .classes
            .get(class_name)
            .ok_or_else(|| ElabError::UndeclaredName(class_name.to_string()))?
            .body
            .clone();

        let mut elab = ModuleElab::new(emitted_name, bindings);
        for stmt in body.iter() {
            elab.top_stmt(self, stmt)?;
        }
        elab.finish(self);

        let module = elab.module;
        debug!(
            module = %module.name,
            ports = module.ports.len(),
            signals = module.signals.len(),
            instances = module.instances.len(),
            "elaborated module"
        );
        self.emitted.insert(module.name.clone(), self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    /// Direction and width of a port on an already-emitted module
    fn port_info(&self, module: &str, port: &str) -> Option<(Direction, u32)> {
        let index = *self.emitted.get(module)?;
        let m = &self.modules[index];
        let p = m.ports.iter().find(|p| p.name == port)?;
        Some((p.direction, m.shape_width(&p.shape)))
    }

    fn report_error(&mut self, module: &str, err: ElabError) {
        let mut diag = Diagnostic::error(err.kind(), err.to_string()).with_module(module);
        if let Some(entity) = err.entity() {
            diag = diag.with_entity(entity);
        }
        self.diagnostics.push(diag);
        self.failed = true;
    }
}

// ----------------------------------------------------------------------
// Per-module elaboration
// ----------------------------------------------------------------------

#[derive(Clone)]
struct Symbol {
    shape: Shape,
    kind: SymbolKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Input,
    Output,
    Signal,
    Wire,
}

/// Per-signal storage classification
#[derive(Clone, PartialEq, Eq)]
enum Storage {
    Comb,
    Seq(Vec<Edge>),
}

fn storage_desc(storage: &Storage) -> String {
    match storage {
        Storage::Comb => "combinational".to_string(),
        Storage::Seq(edges) => {
            let list: Vec<String> = edges.iter().map(|e| e.to_string()).collect();
            format!("sequential @({})", list.join(" or "))
        }
    }
}

struct ModuleElab {
    module: Module,
    symbols: IndexMap<String, Symbol>,
    consts: ConstEvaluator,
    storage: IndexMap<String, Storage>,
    /// Instance name → emitted submodule name
    instances: IndexMap<String, String>,
    /// Edge set of the enclosing guard, `None` in combinational context
    current_edges: Option<Vec<Edge>>,
    /// Nesting depth of `if`/`match` bodies
    cond_depth: usize,
    /// Nesting depth of unrolling loops
    loop_depth: usize,
    /// Combinational signals given an unconditional default
    defaulted: IndexSet<String>,
    latch_warned: IndexSet<String>,
}

impl ModuleElab {
    fn new(name: String, bindings: &[(String, i64)]) -> Self {
        let mut module = Module::new(name);
        let mut consts = ConstEvaluator::new();
        for (param, value) in bindings {
            consts.bind(param.clone(), *value);
            module.parameters.insert(param.clone(), *value);
        }
        Self {
            module,
            symbols: IndexMap::new(),
            consts,
            storage: IndexMap::new(),
            instances: IndexMap::new(),
            current_edges: None,
            cond_depth: 0,
            loop_depth: 0,
            defaulted: IndexSet::new(),
            latch_warned: IndexSet::new(),
        }
    }

    /// Visit a module-body statement; generated combinational statements
    /// land in the module's single `always_comb` bucket
    fn top_stmt(&mut self, comp: &mut Compilation, stmt: &Stmt) -> ElabResult<()> {
        let mut out = Vec::new();
        self.body_stmt(comp, stmt, &mut out)?;
        self.module.comb.extend(out);
        Ok(())
    }

    /// General statement visitor. Generated statements are pushed to
    /// `out`; an edge-guarded `if` instead routes its body into the
    /// matching sequential block.
    fn body_stmt(
        &mut self,
        comp: &mut Compilation,
        stmt: &Stmt,
        out: &mut Vec<Statement>,
    ) -> ElabResult<()> {
        match stmt {
            Stmt::Import | Stmt::Pass => Ok(()),
            Stmt::Expr(_) => {
                debug!(module = %self.module.name, "ignoring bare expression statement");
                Ok(())
            }
            Stmt::ClassDef(class) => self.define_enum(class),
            Stmt::Assign(assign) => self.assign_stmt(comp, assign, out),
            Stmt::If(ifstmt) => {
                if self.current_edges.is_none() {
                    let edges = edge_guard(&ifstmt.test);
                    if !edges.is_empty() {
                        return self.seq_guard(comp, ifstmt, edges);
                    }
                }
                self.if_stmt(comp, ifstmt, out)
            }
            Stmt::For(forstmt) => self.for_stmt(comp, forstmt, out),
            Stmt::Match(matchstmt) => self.match_stmt(comp, matchstmt, out),
        }
    }

    /// An `if` whose test carries edge predicates opens a sequential
    /// context; its body statements collect into one `always_ff` block
    /// per distinct edge tuple
    fn seq_guard(
        &mut self,
        comp: &mut Compilation,
        ifstmt: &ast::If,
        edges: Vec<Edge>,
    ) -> ElabResult<()> {
        for edge in &edges {
            if !self.symbols.contains_key(&edge.signal) {
                return Err(ElabError::UndeclaredName(edge.signal.clone()));
            }
        }
        if !ifstmt.orelse.is_empty() {
            debug!(
                module = %self.module.name,
                "ignoring `else` branch of an edge-guarded `if`"
            );
        }
        let index = self.seq_block_index(edges.clone());
        self.current_edges = Some(edges);
        let mut body = Vec::new();
        for stmt in &ifstmt.body {
            self.body_stmt(comp, stmt, &mut body)?;
        }
        self.current_edges = None;
        self.module.seq_blocks[index].body.extend(body);
        Ok(())
    }

    /// Index of the sequential block for this exact edge tuple, creating
    /// it on first use
    fn seq_block_index(&mut self, edges: Vec<Edge>) -> usize {
        if let Some(pos) = self.module.seq_blocks.iter().position(|b| b.edges == edges) {
            return pos;
        }
        self.module.seq_blocks.push(SeqBlock {
            edges,
            body: Vec::new(),
        });
        self.module.seq_blocks.len() - 1
    }

    // ------------------------------------------------------------------
    // Assignment dispatch
    // ------------------------------------------------------------------

    fn assign_stmt(
        &mut self,
        comp: &mut Compilation,
        assign: &Assign,
        out: &mut Vec<Statement>,
    ) -> ElabResult<()> {
        // Submodule wiring: `instance.port = expr`
        if let Expr::Attribute { value, attr } = &assign.target {
            if let Some(base) = value.as_name() {
                if self.instances.contains_key(base) {
                    let base = base.to_string();
                    return self.wire_port(comp, &base, attr, &assign.value);
                }
                return Err(ElabError::UndeclaredName(format!("{}.{}", base, attr)));
            }
            return Err(ElabError::NonStaticExpression(
                "unsupported assignment target".into(),
            ));
        }

        if let Expr::Name(name) = &assign.target {
            // Port declaration or submodule instantiation
            if let Expr::Call { func, args, kwargs } = &assign.value {
                if let Some(fname) = func.as_name() {
                    match fname {
                        "In" | "Out" => {
                            if args.len() != 1 || !kwargs.is_empty() {
                                return Err(ElabError::NonStaticExpression(format!(
                                    "`{}` takes exactly one type argument",
                                    fname
                                )));
                            }
                            let shape = self.decl_shape(&args[0])?;
                            let direction = if fname == "In" {
                                Direction::Input
                            } else {
                                Direction::Output
                            };
                            return self.declare_port(name, direction, shape);
                        }
                        _ if comp.classes.contains_key(fname) => {
                            let name = name.clone();
                            let fname = fname.to_string();
                            return self.instantiate(comp, &name, &fname, args, kwargs);
                        }
                        "range" => {
                            return Err(ElabError::NonStaticExpression(
                                "`range` is only meaningful in `for` loops".into(),
                            ))
                        }
                        other => return Err(ElabError::UndeclaredName(other.to_string())),
                    }
                }
            }

            // Internal signal declaration: `x = bit[...]` or `x = EnumName`
            if let Some(shape) = self.try_decl_shape(&assign.value)? {
                return self.declare_signal(name, shape);
            }

            // Parameter definition: undeclared name, constant value, not
            // inside any block
            if !self.symbols.contains_key(name)
                && self.current_edges.is_none()
                && self.cond_depth == 0
                && self.loop_depth == 0
            {
                if let Ok(value) = self.consts.eval(&assign.value) {
                    if self.consts.lookup(name).is_some() {
                        return Err(ElabError::DuplicateDefinition(name.clone()));
                    }
                    self.consts.bind(name.clone(), value);
                    self.module.parameters.insert(name.clone(), value);
                    return Ok(());
                }
            }
        }

        self.hardware_assign(comp, assign, out)
    }

    fn declare_port(
        &mut self,
        name: &str,
        direction: Direction,
        shape: Shape,
    ) -> ElabResult<()> {
        self.check_fresh(name)?;
        self.symbols.insert(
            name.to_string(),
            Symbol {
                shape: shape.clone(),
                kind: match direction {
                    Direction::Input => SymbolKind::Input,
                    Direction::Output => SymbolKind::Output,
                },
            },
        );
        self.module.ports.push(Port {
            name: name.to_string(),
            direction,
            shape,
        });
        Ok(())
    }

    fn declare_signal(&mut self, name: &str, shape: Shape) -> ElabResult<()> {
        self.check_fresh(name)?;
        self.symbols.insert(
            name.to_string(),
            Symbol {
                shape: shape.clone(),
                kind: SymbolKind::Signal,
            },
        );
        self.module.signals.push(Signal {
            name: name.to_string(),
            shape,
        });
        Ok(())
    }

    fn check_fresh(&self, name: &str) -> ElabResult<()> {
        if self.symbols.contains_key(name)
            || self.module.parameters.contains_key(name)
            || self.module.enums.contains_key(name)
            || self.instances.contains_key(name)
        {
            return Err(ElabError::DuplicateDefinition(name.to_string()));
        }
        Ok(())
    }

    /// Shape of a type expression, or an error if it is not one
    fn decl_shape(&self, expr: &Expr) -> ElabResult<Shape> {
        match self.try_decl_shape(expr)? {
            Some(shape) => Ok(shape),
            None => Err(ElabError::NonStaticExpression(
                "expected a signal type such as `bit[8]`".into(),
            )),
        }
    }

    /// Recognize `bit`, `bit[W]`, `bit[DEPTH][WIDTH]`, or an enum type
    /// name. Returns `Ok(None)` when the expression is not a type.
    fn try_decl_shape(&self, expr: &Expr) -> ElabResult<Option<Shape>> {
        match expr {
            Expr::Name(n) if n == "bit" => Ok(Some(Shape::Vector(1))),
            Expr::Name(n) if self.module.enums.contains_key(n) => {
                Ok(Some(Shape::Enum(n.clone())))
            }
            Expr::Subscript { .. } => {
                // Walk the subscript chain down to its base
                let mut dims: Vec<&Index> = Vec::new();
                let mut current = expr;
                while let Expr::Subscript { value, index } = current {
                    dims.push(index);
                    current = value.as_ref();
                }
                if current.as_name() != Some("bit") {
                    return Ok(None);
                }
                // Innermost subscript first: `bit[DEPTH][WIDTH]`
                dims.reverse();
                let mut resolved = Vec::new();
                for index in dims {
                    let dim = match index {
                        Index::Single(e) => self
                            .consts
                            .eval(e)
                            .map_err(|e| ElabError::NonStaticExpression(e.to_string()))?,
                        Index::Slice { .. } => {
                            return Err(ElabError::NonStaticExpression(
                                "signal types take integer dimensions, not slices".into(),
                            ))
                        }
                    };
                    if dim < 1 || dim > i64::from(u32::MAX) {
                        return Err(ElabError::NonStaticExpression(format!(
                            "signal dimension must be at least 1, got {}",
                            dim
                        )));
                    }
                    resolved.push(dim as u32);
                }
                match resolved.as_slice() {
                    [width] => Ok(Some(Shape::Vector(*width))),
                    [depth, width] => Ok(Some(Shape::Memory {
                        depth: *depth,
                        width: *width,
                    })),
                    _ => Err(ElabError::NonStaticExpression(
                        "signals support at most two dimensions".into(),
                    )),
                }
            }
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Enums
    // ------------------------------------------------------------------

    fn define_enum(&mut self, class: &ClassDef) -> ElabResult<()> {
        if !class.bases.iter().any(|b| b == "Enum") {
            debug!(class = %class.name, "ignoring nested class without an `Enum` base");
            return Ok(());
        }
        self.check_fresh(&class.name)?;

        let mut members: IndexMap<String, u64> = IndexMap::new();
        for stmt in &class.body {
            match stmt {
                Stmt::Assign(assign) => {
                    let member = assign.target.as_name().ok_or_else(|| {
                        ElabError::NonStaticExpression(
                            "enum members must be plain `NAME = value` assignments".into(),
                        )
                    })?;
                    let value = self
                        .consts
                        .eval(&assign.value)
                        .map_err(|e| ElabError::NonStaticExpression(e.to_string()))?;
                    if value < 0 {
                        return Err(ElabError::NonStaticExpression(format!(
                            "enum member `{}` must be non-negative",
                            member
                        )));
                    }
                    if members.insert(member.to_string(), value as u64).is_some() {
                        return Err(ElabError::DuplicateDefinition(member.to_string()));
                    }
                }
                Stmt::Pass => {}
                _ => debug!(class = %class.name, "ignoring statement inside enum body"),
            }
        }

        let max = members.values().copied().max().unwrap_or(0);
        let width = min_width(max as i64);
        self.module
            .enums
            .insert(class.name.clone(), EnumType { members, width });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Submodule instantiation and wiring
    // ------------------------------------------------------------------

    fn instantiate(
        &mut self,
        comp: &mut Compilation,
        inst_name: &str,
        template: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> ElabResult<()> {
        if !args.is_empty() {
            return Err(ElabError::NonStaticExpression(
                "module instantiation takes keyword parameters only".into(),
            ));
        }
        self.check_fresh(inst_name)?;

        // Evaluate parameter bindings in the enclosing module's scope
        let mut given: Vec<(String, i64)> = Vec::new();
        for (param, value) in kwargs {
            let v = self
                .consts
                .eval(value)
                .map_err(|e| ElabError::NonStaticExpression(e.to_string()))?;
            given.push((param.clone(), v));
        }

        // Canonical order: formals in declaration order, extras after
        let formals = comp
            .classes
            .get(template)
            .map(|c| c.formals.clone())
            .unwrap_or_default();
        let mut ordered: Vec<(String, i64)> = Vec::new();
        for formal in &formals {
            if let Some(pos) = given.iter().position(|(name, _)| name == formal) {
                ordered.push(given.remove(pos));
            }
        }
        ordered.extend(given);

        let emitted = if ordered.is_empty() {
            template.to_string()
        } else {
            let pairs: Vec<String> = ordered
                .iter()
                .map(|(name, value)| format!("{}{}", name, value))
                .collect();
            format!("{}_{}", template, pairs.join("_"))
        };

        // Monomorphize on demand, once per parameter tuple
        if !comp.emitted.contains_key(&emitted) {
            if comp.mono_failed.contains(&emitted) {
                return Err(ElabError::UndeclaredName(format!(
                    "module `{}` (failed to elaborate)",
                    emitted
                )));
            }
            if let Err(err) = comp.elaborate(template, emitted.clone(), &ordered) {
                comp.report_error(&emitted, err);
                comp.mono_failed.insert(emitted.clone());
                return Err(ElabError::UndeclaredName(format!(
                    "module `{}` (failed to elaborate)",
                    emitted
                )));
            }
        }

        // Auto-declare one intermediate wire per output port; inputs wait
        // for wiring assignments
        let sub_index = match comp.emitted.get(&emitted) {
            Some(index) => *index,
            None => return Err(ElabError::UndeclaredName(emitted)),
        };
        let ports: Vec<(String, Direction, Shape, u32)> = comp.modules[sub_index]
            .ports
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    p.direction,
                    p.shape.clone(),
                    comp.modules[sub_index].shape_width(&p.shape),
                )
            })
            .collect();

        let mut connections: IndexMap<String, Option<Expression>> = IndexMap::new();
        for (port, direction, shape, width) in ports {
            match direction {
                Direction::Output => {
                    let wire = format!("{}_{}", inst_name, port);
                    self.check_fresh(&wire)?;
                    // Enum types live in the submodule; the wire carries
                    // the raw bits
                    let wire_shape = match shape {
                        Shape::Enum(_) => Shape::Vector(width),
                        other => other,
                    };
                    self.symbols.insert(
                        wire.clone(),
                        Symbol {
                            shape: wire_shape.clone(),
                            kind: SymbolKind::Wire,
                        },
                    );
                    self.module.wires.push(Signal {
                        name: wire.clone(),
                        shape: wire_shape,
                    });
                    connections.insert(port, Some(Expression::Name(wire)));
                }
                Direction::Input => {
                    connections.insert(port, None);
                }
            }
        }

        self.instances
            .insert(inst_name.to_string(), emitted.clone());
        self.module.instances.push(Instance {
            name: inst_name.to_string(),
            module: emitted,
            connections,
        });
        Ok(())
    }

    /// Defer `instance.port = expr` into the instance's wiring table
    fn wire_port(
        &mut self,
        comp: &mut Compilation,
        inst: &str,
        port: &str,
        value: &Expr,
    ) -> ElabResult<()> {
        let sub_name = self.instances.get(inst).cloned().unwrap_or_default();
        let (direction, width) =
            comp.port_info(&sub_name, port)
                .ok_or_else(|| ElabError::UnknownPort {
                    module: sub_name.clone(),
                    port: port.to_string(),
                })?;
        if direction == Direction::Output {
            return Err(ElabError::OutputPortDriven {
                module: sub_name,
                port: port.to_string(),
            });
        }

        let rhs = if let Ok(v) = self.consts.eval(value) {
            Expression::Literal {
                value: v,
                width: Some(width),
            }
        } else {
            let rhs = self.lower_expr(value)?;
            let rhs_width = self.expr_width(&rhs);
            if rhs_width > width {
                comp.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::WidthMismatch,
                        format!(
                            "wiring `{}.{}` truncates a {}-bit value to {} bits",
                            inst, port, rhs_width, width
                        ),
                    )
                    .with_module(&self.module.name)
                    .with_entity(inst),
                );
            }
            rhs
        };

        if let Some(instance) = self.module.instances.iter_mut().find(|i| i.name == inst) {
            instance.connections.insert(port.to_string(), Some(rhs));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hardware assignments
    // ------------------------------------------------------------------

    fn hardware_assign(
        &mut self,
        comp: &mut Compilation,
        assign: &Assign,
        out: &mut Vec<Statement>,
    ) -> ElabResult<()> {
        // Fold the RHS to a constant, or lower it once
        enum Rhs {
            Const(i64),
            Expr(Expression),
        }
        let folded = match self.consts.eval(&assign.value) {
            Ok(v) => Rhs::Const(v),
            Err(_) => Rhs::Expr(self.lower_expr(&assign.value)?),
        };

        // First assignment to an undeclared name declares an internal
        // signal of the inferred width
        if let Expr::Name(name) = &assign.target {
            if !self.symbols.contains_key(name) {
                if self.consts.lookup(name).is_some() {
                    return Err(ElabError::DuplicateDefinition(name.clone()));
                }
                let width = match &folded {
                    Rhs::Const(v) => min_width(*v),
                    Rhs::Expr(expr) => self.expr_width(expr),
                };
                self.declare_signal(name, Shape::Vector(width))?;
            }
        }

        let (lhs, root, lhs_width) = self.lower_lvalue(&assign.target)?;
        self.classify(&root)?;

        let rhs = match folded {
            Rhs::Const(value) => Expression::Literal {
                value,
                width: Some(lhs_width),
            },
            Rhs::Expr(expr) => {
                let rhs_width = self.expr_width(&expr);
                if rhs_width > lhs_width {
                    comp.diagnostics.push(
                        Diagnostic::warning(
                            DiagnosticKind::WidthMismatch,
                            format!(
                                "assignment to `{}` truncates a {}-bit value to {} bits",
                                root, rhs_width, lhs_width
                            ),
                        )
                        .with_module(&self.module.name)
                        .with_entity(&root),
                    );
                }
                expr
            }
        };

        // A combinational signal assigned only under conditions risks a
        // latch; the defaulting pattern avoids it
        if self.current_edges.is_none() {
            if self.cond_depth == 0 {
                self.defaulted.insert(root.clone());
            } else if !self.defaulted.contains(&root) && self.latch_warned.insert(root.clone()) {
                comp.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::MissingDefault,
                        format!(
                            "combinational signal `{}` is conditionally assigned without a preceding default",
                            root
                        ),
                    )
                    .with_module(&self.module.name)
                    .with_entity(&root),
                );
            }
        }

        out.push(Statement::Assign { lhs, rhs });
        Ok(())
    }

    /// Resolve an assignment target to (lvalue, root signal, width)
    fn lower_lvalue(&self, target: &Expr) -> ElabResult<(LValue, String, u32)> {
        match target {
            Expr::Name(name) => {
                let symbol = self
                    .symbols
                    .get(name)
                    .ok_or_else(|| ElabError::UndeclaredName(name.clone()))?;
                let width = self.module.shape_width(&symbol.shape);
                Ok((LValue::Name(name.clone()), name.clone(), width))
            }
            Expr::Subscript { value, index } => {
                let base = value
                    .as_name()
                    .ok_or_else(|| {
                        ElabError::NonStaticExpression(
                            "subscripted assignment target must be a signal name".into(),
                        )
                    })?
                    .to_string();
                let symbol = self
                    .symbols
                    .get(&base)
                    .ok_or_else(|| ElabError::UndeclaredName(base.clone()))?;
                match symbol.shape.clone() {
                    Shape::Vector(width) => match index {
                        Index::Single(e) => {
                            let expr = self.lower_index(&base, e, width)?;
                            Ok((
                                LValue::Bit {
                                    base: base.clone(),
                                    index: Box::new(expr),
                                },
                                base,
                                1,
                            ))
                        }
                        Index::Slice { hi, lo } => {
                            let (hi, lo) = self.eval_slice(&base, hi, lo, width)?;
                            let slice_width = hi - lo + 1;
                            Ok((
                                LValue::Slice {
                                    base: base.clone(),
                                    hi,
                                    lo,
                                },
                                base,
                                slice_width,
                            ))
                        }
                    },
                    Shape::Memory { depth, width } => match index {
                        Index::Single(e) => {
                            let expr = self.lower_index(&base, e, depth)?;
                            Ok((
                                LValue::Element {
                                    base: base.clone(),
                                    index: Box::new(expr),
                                },
                                base,
                                width,
                            ))
                        }
                        Index::Slice { .. } => Err(ElabError::NonStaticExpression(
                            "memories cannot be sliced".into(),
                        )),
                    },
                    Shape::Enum(_) => Err(ElabError::NonStaticExpression(
                        "enum-typed signals cannot be indexed".into(),
                    )),
                }
            }
            _ => Err(ElabError::NonStaticExpression(
                "unsupported assignment target".into(),
            )),
        }
    }

    /// Record the storage class of a signal, rejecting disagreement
    fn classify(&mut self, root: &str) -> ElabResult<()> {
        let new = match &self.current_edges {
            None => Storage::Comb,
            Some(edges) => Storage::Seq(edges.clone()),
        };
        match self.storage.get(root) {
            None => {
                self.storage.insert(root.to_string(), new);
                Ok(())
            }
            Some(prev) if *prev == new => Ok(()),
            Some(prev) => Err(ElabError::MixedStorageClass {
                signal: root.to_string(),
                first: storage_desc(prev),
                second: storage_desc(&new),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn if_stmt(
        &mut self,
        comp: &mut Compilation,
        ifstmt: &ast::If,
        out: &mut Vec<Statement>,
    ) -> ElabResult<()> {
        let cond = self.lower_expr(&ifstmt.test)?;
        self.cond_depth += 1;
        let mut then_body = Vec::new();
        for stmt in &ifstmt.body {
            self.body_stmt(comp, stmt, &mut then_body)?;
        }
        let mut else_body = Vec::new();
        for stmt in &ifstmt.orelse {
            self.body_stmt(comp, stmt, &mut else_body)?;
        }
        self.cond_depth -= 1;
        out.push(Statement::If {
            cond,
            then_body,
            else_body,
        });
        Ok(())
    }

    /// Unroll a static loop, binding the index per iteration
    fn for_stmt(
        &mut self,
        comp: &mut Compilation,
        forstmt: &ast::For,
        out: &mut Vec<Statement>,
    ) -> ElabResult<()> {
        let (args, kwargs) = match &forstmt.iter {
            Expr::Call { func, args, kwargs } if func.as_name() == Some("range") => {
                (args, kwargs)
            }
            _ => return Err(ElabError::NonStaticLoop),
        };
        if !kwargs.is_empty() {
            return Err(ElabError::NonStaticLoop);
        }
        let (start, stop, step) = self
            .consts
            .eval_range_args(args)
            .map_err(|e| ElabError::NonStaticExpression(e.to_string()))?;
        if step == 0 {
            return Err(ElabError::NonStaticExpression(
                "`range` step must not be zero".into(),
            ));
        }

        self.loop_depth += 1;
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            self.consts.push_scope();
            self.consts.bind(forstmt.target.clone(), i);
            for stmt in &forstmt.body {
                self.body_stmt(comp, stmt, out)?;
            }
            self.consts.pop_scope();
            i += step;
        }
        self.loop_depth -= 1;
        Ok(())
    }

    /// Lower `match` to a `unique case`; a wildcard arm becomes the
    /// default body
    fn match_stmt(
        &mut self,
        comp: &mut Compilation,
        matchstmt: &ast::Match,
        out: &mut Vec<Statement>,
    ) -> ElabResult<()> {
        let subject = self.lower_expr(&matchstmt.subject)?;
        let mut arms = Vec::new();
        let mut default = Vec::new();
        self.cond_depth += 1;
        for arm in &matchstmt.arms {
            let mut body = Vec::new();
            for stmt in &arm.body {
                self.body_stmt(comp, stmt, &mut body)?;
            }
            match &arm.pattern {
                Pattern::Wildcard => default = body,
                Pattern::Value(expr) => {
                    let label = if let Ok(v) = self.consts.eval(expr) {
                        Expression::Literal {
                            value: v,
                            width: None,
                        }
                    } else {
                        self.lower_expr(expr)?
                    };
                    arms.push(CaseArm { label, body });
                }
            }
        }
        self.cond_depth -= 1;
        out.push(Statement::Case {
            subject,
            arms,
            default,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expression lowering and width inference
    // ------------------------------------------------------------------

    /// Lower a hardware expression: resolve names, fold constants into
    /// plain literals, map enum members and submodule output reads
    fn lower_expr(&self, expr: &Expr) -> ElabResult<Expression> {
        match expr {
            Expr::Int(v) => Ok(Expression::Literal {
                value: *v,
                width: None,
            }),
            Expr::Name(name) => {
                if let Some(v) = self.consts.lookup(name) {
                    return Ok(Expression::Literal {
                        value: v,
                        width: None,
                    });
                }
                if self.symbols.contains_key(name) {
                    return Ok(Expression::Name(name.clone()));
                }
                Err(ElabError::UndeclaredName(name.clone()))
            }
            Expr::Attribute { value, attr } => {
                let base = value.as_name().ok_or_else(|| {
                    ElabError::NonStaticExpression(
                        "nested attribute access is not supported".into(),
                    )
                })?;
                if attr == "posedge" || attr == "negedge" {
                    // Edge predicates are only recognized in `if` guards
                    return Err(ElabError::UndeclaredName(format!("{}.{}", base, attr)));
                }
                if let Some(enum_type) = self.module.enums.get(base) {
                    if enum_type.members.contains_key(attr) {
                        return Ok(Expression::EnumMember(attr.clone()));
                    }
                    return Err(ElabError::UndeclaredName(format!("{}.{}", base, attr)));
                }
                if let Some(sub_name) = self.instances.get(base) {
                    let wire = format!("{}_{}", base, attr);
                    if self.symbols.contains_key(&wire) {
                        return Ok(Expression::Name(wire));
                    }
                    return Err(ElabError::UnknownPort {
                        module: sub_name.clone(),
                        port: attr.clone(),
                    });
                }
                Err(ElabError::UndeclaredName(format!("{}.{}", base, attr)))
            }
            Expr::Subscript { value, index } => {
                let base = value
                    .as_name()
                    .ok_or_else(|| {
                        ElabError::NonStaticExpression(
                            "subscripts are only supported on signals".into(),
                        )
                    })?
                    .to_string();
                let symbol = self
                    .symbols
                    .get(&base)
                    .ok_or_else(|| ElabError::UndeclaredName(base.clone()))?;
                match symbol.shape.clone() {
                    Shape::Vector(width) => match index {
                        Index::Single(e) => {
                            let idx = self.lower_index(&base, e, width)?;
                            Ok(Expression::Bit {
                                base,
                                index: Box::new(idx),
                            })
                        }
                        Index::Slice { hi, lo } => {
                            let (hi, lo) = self.eval_slice(&base, hi, lo, width)?;
                            Ok(Expression::Slice { base, hi, lo })
                        }
                    },
                    Shape::Memory { depth, .. } => match index {
                        Index::Single(e) => {
                            let idx = self.lower_index(&base, e, depth)?;
                            Ok(Expression::Element {
                                base,
                                index: Box::new(idx),
                            })
                        }
                        Index::Slice { .. } => Err(ElabError::NonStaticExpression(
                            "memories cannot be sliced".into(),
                        )),
                    },
                    Shape::Enum(_) => Err(ElabError::NonStaticExpression(
                        "enum-typed signals cannot be indexed".into(),
                    )),
                }
            }
            Expr::Call { .. } => Err(ElabError::NonStaticExpression(
                "call expressions are not supported in hardware expressions".into(),
            )),
            Expr::BinOp { left, op, right } => Ok(Expression::Binary {
                op: lower_binop(*op),
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            }),
            Expr::BoolOp { op, values } => {
                let mut lowered = Vec::new();
                for value in values {
                    lowered.push(self.lower_expr(value)?);
                }
                Ok(Expression::Bool {
                    op: match op {
                        ast::BoolOp::And => BoolOp::And,
                        ast::BoolOp::Or => BoolOp::Or,
                    },
                    values: lowered,
                })
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.lower_expr(operand)?;
                let op = match op {
                    ast::UnaryOp::Invert => UnaryOp::BitwiseNot,
                    ast::UnaryOp::Not => UnaryOp::Not,
                    ast::UnaryOp::Neg => UnaryOp::Negate,
                    // Unary plus is a no-op
                    ast::UnaryOp::Pos => return Ok(operand),
                };
                Ok(Expression::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            Expr::Compare { left, op, right } => Ok(Expression::Compare {
                op: match op {
                    ast::CmpOp::Eq => CompareOp::Equal,
                    ast::CmpOp::Ne => CompareOp::NotEqual,
                    ast::CmpOp::Lt => CompareOp::Less,
                    ast::CmpOp::Le => CompareOp::LessEqual,
                    ast::CmpOp::Gt => CompareOp::Greater,
                    ast::CmpOp::Ge => CompareOp::GreaterEqual,
                },
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            }),
            Expr::Tuple(elements) => {
                let mut parts = Vec::new();
                for element in elements {
                    // Constant concatenation elements take their
                    // smallest-width form
                    if let Ok(v) = self.consts.eval(element) {
                        parts.push(Expression::Literal {
                            value: v,
                            width: Some(min_width(v)),
                        });
                    } else {
                        parts.push(self.lower_expr(element)?);
                    }
                }
                Ok(Expression::Concat(parts))
            }
            Expr::IfExp {
                test,
                body,
                orelse,
            } => Ok(Expression::Ternary {
                cond: Box::new(self.lower_expr(test)?),
                then_expr: Box::new(self.lower_expr(body)?),
                else_expr: Box::new(self.lower_expr(orelse)?),
            }),
        }
    }

    /// Lower a single-index expression, bounds-checking constant indices
    /// against `limit`
    fn lower_index(&self, base: &str, index: &Expr, limit: u32) -> ElabResult<Expression> {
        if let Ok(v) = self.consts.eval(index) {
            if v < 0 || v >= i64::from(limit) {
                return Err(ElabError::IndexOutOfBounds {
                    base: base.to_string(),
                    index: v,
                    limit,
                });
            }
            return Ok(Expression::Literal {
                value: v,
                width: None,
            });
        }
        self.lower_expr(index)
    }

    /// Evaluate slice bounds; both endpoints must be static
    fn eval_slice(&self, base: &str, hi: &Expr, lo: &Expr, width: u32) -> ElabResult<(u32, u32)> {
        let hi = self
            .consts
            .eval(hi)
            .map_err(|e| ElabError::NonStaticExpression(e.to_string()))?;
        let lo = self
            .consts
            .eval(lo)
            .map_err(|e| ElabError::NonStaticExpression(e.to_string()))?;
        if lo < 0 {
            return Err(ElabError::IndexOutOfBounds {
                base: base.to_string(),
                index: lo,
                limit: width,
            });
        }
        if hi >= i64::from(width) {
            return Err(ElabError::IndexOutOfBounds {
                base: base.to_string(),
                index: hi,
                limit: width,
            });
        }
        if lo > hi {
            return Err(ElabError::NonStaticExpression(format!(
                "slice `{}[{}:{}]` has its bounds reversed",
                base, hi, lo
            )));
        }
        Ok((hi as u32, lo as u32))
    }

    /// Inferred bit width of a lowered expression
    fn expr_width(&self, expr: &Expression) -> u32 {
        match expr {
            Expression::Literal { value, .. } => min_width(*value),
            Expression::Name(name) => self
                .symbols
                .get(name)
                .map(|s| self.module.shape_width(&s.shape))
                .unwrap_or(1),
            Expression::EnumMember(member) => self
                .module
                .enums
                .values()
                .find(|e| e.members.contains_key(member))
                .map(|e| e.width)
                .unwrap_or(1),
            Expression::Unary { operand, .. } => self.expr_width(operand),
            Expression::Binary { left, right, .. } => {
                self.expr_width(left).max(self.expr_width(right))
            }
            Expression::Bool { .. } | Expression::Compare { .. } => 1,
            Expression::Ternary {
                then_expr,
                else_expr,
                ..
            } => self.expr_width(then_expr).max(self.expr_width(else_expr)),
            Expression::Concat(parts) => parts.iter().map(|p| self.expr_width(p)).sum(),
            Expression::Bit { .. } => 1,
            Expression::Slice { hi, lo, .. } => hi - lo + 1,
            Expression::Element { base, .. } => self
                .symbols
                .get(base)
                .map(|s| self.module.shape_width(&s.shape))
                .unwrap_or(1),
        }
    }

    /// End-of-module checks
    fn finish(&mut self, comp: &mut Compilation) {
        for instance in &self.module.instances {
            for (port, connection) in &instance.connections {
                if connection.is_none() {
                    comp.diagnostics.push(
                        Diagnostic::warning(
                            DiagnosticKind::UnconnectedPort,
                            format!(
                                "input port `{}` of instance `{}` is not wired",
                                port, instance.name
                            ),
                        )
                        .with_module(&self.module.name)
                        .with_entity(&instance.name),
                    );
                }
            }
        }
    }
}

fn lower_binop(op: ast::BinOp) -> BinaryOp {
    match op {
        ast::BinOp::Add => BinaryOp::Add,
        ast::BinOp::Sub => BinaryOp::Sub,
        ast::BinOp::Mul => BinaryOp::Mul,
        ast::BinOp::Div => BinaryOp::Div,
        ast::BinOp::Mod => BinaryOp::Mod,
        ast::BinOp::Pow => BinaryOp::Pow,
        ast::BinOp::BitAnd => BinaryOp::BitwiseAnd,
        ast::BinOp::BitOr => BinaryOp::BitwiseOr,
        ast::BinOp::BitXor => BinaryOp::BitwiseXor,
        ast::BinOp::Shl => BinaryOp::LeftShift,
        ast::BinOp::Shr => BinaryOp::RightShift,
    }
}

// ----------------------------------------------------------------------
// Edge predicates
// ----------------------------------------------------------------------

/// Extract edge predicates from an `if` test. Only `name.posedge` /
/// `name.negedge` and their `or`-disjunctions are recognized.
fn edge_guard(test: &Expr) -> Vec<Edge> {
    let mut edges = Vec::new();
    collect_edges(test, &mut edges);
    edges
}

fn collect_edges(expr: &Expr, out: &mut Vec<Edge>) {
    match expr {
        Expr::Attribute { value, attr } => {
            let polarity = match attr.as_str() {
                "posedge" => Some(EdgePolarity::Pos),
                "negedge" => Some(EdgePolarity::Neg),
                _ => None,
            };
            if let (Some(name), Some(polarity)) = (value.as_name(), polarity) {
                out.push(Edge {
                    signal: name.to_string(),
                    polarity,
                });
            }
        }
        Expr::BoolOp {
            op: ast::BoolOp::Or,
            values,
        } => {
            for value in values {
                collect_edges(value, out);
            }
        }
        _ => {}
    }
}

// ----------------------------------------------------------------------
// Template detection
// ----------------------------------------------------------------------

/// Free names of a module class: names read in static positions (widths,
/// slice and index bounds, loop ranges, instantiation parameters) that
/// the class never binds itself. Non-empty means the class is a template
/// and these are its formal parameters, in first-appearance order.
fn free_names(class: &ClassDef, known_modules: &IndexSet<String>) -> Vec<String> {
    let mut defined: IndexSet<String> = BUILTINS.iter().map(|s| s.to_string()).collect();
    defined.extend(known_modules.iter().cloned());
    collect_defined(&class.body, &mut defined);

    let mut reads: IndexSet<String> = IndexSet::new();
    collect_static_reads(&class.body, &mut reads);

    reads
        .into_iter()
        .filter(|name| !defined.contains(name))
        .collect()
}

/// Names bound inside the class body: assignment targets at any depth,
/// loop indices, and nested class names
fn collect_defined(stmts: &[Stmt], defined: &mut IndexSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(assign) => {
                if let Some(name) = assign.target.as_name() {
                    defined.insert(name.to_string());
                }
            }
            Stmt::ClassDef(class) => {
                defined.insert(class.name.clone());
            }
            Stmt::If(ifstmt) => {
                collect_defined(&ifstmt.body, defined);
                collect_defined(&ifstmt.orelse, defined);
            }
            Stmt::For(forstmt) => {
                defined.insert(forstmt.target.clone());
                collect_defined(&forstmt.body, defined);
            }
            Stmt::Match(matchstmt) => {
                for arm in &matchstmt.arms {
                    collect_defined(&arm.body, defined);
                }
            }
            _ => {}
        }
    }
}

fn collect_static_reads(stmts: &[Stmt], reads: &mut IndexSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(assign) => {
                static_positions(&assign.target, reads);
                static_positions(&assign.value, reads);
            }
            Stmt::If(ifstmt) => {
                static_positions(&ifstmt.test, reads);
                collect_static_reads(&ifstmt.body, reads);
                collect_static_reads(&ifstmt.orelse, reads);
            }
            Stmt::For(forstmt) => {
                static_positions(&forstmt.iter, reads);
                collect_static_reads(&forstmt.body, reads);
            }
            Stmt::Match(matchstmt) => {
                static_positions(&matchstmt.subject, reads);
                for arm in &matchstmt.arms {
                    if let Pattern::Value(expr) = &arm.pattern {
                        static_positions(expr, reads);
                    }
                    collect_static_reads(&arm.body, reads);
                }
            }
            Stmt::Expr(expr) => static_positions(expr, reads),
            _ => {}
        }
    }
}

/// Walk an expression, collecting names read in positions that must be
/// compile-time constants
fn static_positions(expr: &Expr, reads: &mut IndexSet<String>) {
    match expr {
        Expr::Subscript { value, index } => {
            if type_base(expr) {
                // `bit[...]` dimensions are entirely static
                all_names_in_index(index, reads);
                static_positions(value, reads);
            } else {
                match index {
                    Index::Single(e) => all_names(e, reads),
                    Index::Slice { hi, lo } => {
                        all_names(hi, reads);
                        all_names(lo, reads);
                    }
                }
                static_positions(value, reads);
            }
        }
        Expr::Call { func, args, kwargs } => {
            if func.as_name() == Some("range") {
                for arg in args {
                    all_names(arg, reads);
                }
            } else {
                for arg in args {
                    static_positions(arg, reads);
                }
            }
            // Instantiation parameter values are constants
            for (_, value) in kwargs {
                all_names(value, reads);
            }
        }
        Expr::Attribute { value, .. } => static_positions(value, reads),
        Expr::BinOp { left, right, .. } => {
            static_positions(left, reads);
            static_positions(right, reads);
        }
        Expr::BoolOp { values, .. } => {
            for value in values {
                static_positions(value, reads);
            }
        }
        Expr::UnaryOp { operand, .. } => static_positions(operand, reads),
        Expr::Compare { left, right, .. } => {
            static_positions(left, reads);
            static_positions(right, reads);
        }
        Expr::Tuple(elements) => {
            for element in elements {
                static_positions(element, reads);
            }
        }
        Expr::IfExp {
            test,
            body,
            orelse,
        } => {
            static_positions(test, reads);
            static_positions(body, reads);
            static_positions(orelse, reads);
        }
        Expr::Int(_) | Expr::Name(_) => {}
    }
}

/// Whether a subscript chain bottoms out at the `bit` type marker
fn type_base(expr: &Expr) -> bool {
    let mut current = expr;
    while let Expr::Subscript { value, .. } = current {
        current = value.as_ref();
    }
    current.as_name() == Some("bit")
}

fn all_names_in_index(index: &Index, reads: &mut IndexSet<String>) {
    match index {
        Index::Single(e) => all_names(e, reads),
        Index::Slice { hi, lo } => {
            all_names(hi, reads);
            all_names(lo, reads);
        }
    }
}

/// Every name read anywhere in an expression
fn all_names(expr: &Expr, reads: &mut IndexSet<String>) {
    match expr {
        Expr::Name(name) => {
            reads.insert(name.clone());
        }
        Expr::Attribute { value, .. } => all_names(value, reads),
        Expr::Subscript { value, index } => {
            all_names(value, reads);
            all_names_in_index(index, reads);
        }
        Expr::Call { func, args, kwargs } => {
            all_names(func, reads);
            for arg in args {
                all_names(arg, reads);
            }
            for (_, value) in kwargs {
                all_names(value, reads);
            }
        }
        Expr::BinOp { left, right, .. } => {
            all_names(left, reads);
            all_names(right, reads);
        }
        Expr::BoolOp { values, .. } => {
            for value in values {
                all_names(value, reads);
            }
        }
        Expr::UnaryOp { operand, .. } => all_names(operand, reads),
        Expr::Compare { left, right, .. } => {
            all_names(left, reads);
            all_names(right, reads);
        }
        Expr::Tuple(elements) => {
            for element in elements {
                all_names(element, reads);
            }
        }
        Expr::IfExp {
            test,
            body,
            orelse,
        } => {
            all_names(test, reads);
            all_names(body, reads);
            all_names(orelse, reads);
        }
        Expr::Int(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use pyhdl_frontend::parse_source;

    fn compile_ok(source: &str) -> Compilation {
        let file = parse_source(source).unwrap();
        let comp = compile(&file);
        let errors: Vec<_> = comp
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        comp
    }

    fn compile_any(source: &str) -> Compilation {
        let file = parse_source(source).unwrap();
        compile(&file)
    }

    #[test]
    fn test_concrete_module_ports_and_widths() {
        let comp = compile_ok(
            "class Adder(Module):\n    a = In(bit[8])\n    b = In(bit[8])\n    s = Out(bit[9])\n    s = a + b\n",
        );
        let module = &comp.modules[0];
        assert_eq!(module.name, "Adder");
        assert_eq!(module.ports.len(), 3);
        assert_eq!(module.ports[2].shape, Shape::Vector(9));
        assert_eq!(module.comb.len(), 1);
    }

    #[test]
    fn test_template_detection_and_deferral() {
        let comp = compile_ok(
            "class ParamAdder(Module):\n    a = In(bit[width])\n    b = In(bit[width])\n    s = Out(bit[width + 1])\n    s = a + b\n",
        );
        // Never instantiated, so never emitted
        assert!(comp.modules.is_empty());
    }

    #[test]
    fn test_monomorphization_naming_and_reuse() {
        let source = "\
class ParamAdder(Module):
    a = In(bit[width])
    b = In(bit[width])
    s = Out(bit[width + 1])
    s = a + b

class Top(Module):
    x = In(bit[8])
    y = In(bit[8])
    z = Out(bit[9])
    u1 = ParamAdder(width=8)
    u2 = ParamAdder(width=8)
    u1.a = x
    u1.b = y
    u2.a = x
    u2.b = y
    z = u1.s
";
        let comp = compile_ok(source);
        let names: Vec<_> = comp.modules.iter().map(|m| m.name.as_str()).collect();
        // One definition for two identical instantiations
        assert_eq!(names, vec!["ParamAdder_width8", "Top"]);
        let mono = &comp.modules[0];
        assert_eq!(mono.parameters.get("width"), Some(&8));
        assert_eq!(mono.ports[0].shape, Shape::Vector(8));
        assert_eq!(mono.ports[2].shape, Shape::Vector(9));
    }

    #[test]
    fn test_intermediate_wires_per_output() {
        let source = "\
class Inner(Module):
    d = In(bit[4])
    q = Out(bit[4])
    q = d

class Outer(Module):
    x = In(bit[4])
    y = Out(bit[4])
    u = Inner()
    u.d = x
    y = u.q
";
        let comp = compile_ok(source);
        let outer = comp.modules.iter().find(|m| m.name == "Outer").unwrap();
        assert_eq!(outer.wires.len(), 1);
        assert_eq!(outer.wires[0].name, "u_q");
        let instance = &outer.instances[0];
        assert!(matches!(
            instance.connections.get("d"),
            Some(Some(Expression::Name(n))) if n == "x"
        ));
    }

    #[test]
    fn test_mixed_storage_class_is_one_error() {
        let source = "\
class Bad(Module):
    clk = In(bit)
    x = Out(bit[4])
    x = 0
    if clk.posedge:
        x = 1
";
        let comp = compile_any(source);
        assert!(comp.failed);
        let errors: Vec<_> = comp
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::MixedStorageClass);
        assert!(comp.modules.is_empty());
    }

    #[test]
    fn test_disagreeing_edge_sets_rejected() {
        let source = "\
class Bad(Module):
    clk = In(bit)
    other = In(bit)
    x = bit[4]
    if clk.posedge:
        x = 1
    if other.posedge:
        x = 2
";
        let comp = compile_any(source);
        assert!(comp.failed);
        assert_eq!(
            comp.diagnostics[0].kind,
            DiagnosticKind::MixedStorageClass
        );
    }

    #[test]
    fn test_loop_unrolling_count() {
        let source = "\
class Enc(Module):
    req = In(bit[8])
    code = Out(bit[3])
    code = 0
    for i in range(8):
        if req[i]:
            code = i
";
        let comp = compile_ok(source);
        let module = &comp.modules[0];
        // default + 8 unrolled ifs
        assert_eq!(module.comb.len(), 9);
    }

    #[test]
    fn test_empty_range_unrolls_to_nothing() {
        let source = "\
class Empty(Module):
    x = Out(bit)
    x = 0
    for i in range(4, 4):
        x = 1
";
        let comp = compile_ok(source);
        assert_eq!(comp.modules[0].comb.len(), 1);
    }

    #[test]
    fn test_range_step_copy_count() {
        let source = "\
class Stepped(Module):
    x = Out(bit[4])
    x = 0
    for i in range(1, 8, 3):
        x = i
";
        let comp = compile_ok(source);
        // i = 1, 4, 7 → default + 3 copies
        assert_eq!(comp.modules[0].comb.len(), 4);
    }

    #[test]
    fn test_non_range_loop_rejected() {
        let source = "\
class Bad(Module):
    x = Out(bit)
    for i in things:
        x = 1
";
        let comp = compile_any(source);
        assert_eq!(comp.diagnostics[0].kind, DiagnosticKind::NonStaticLoop);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let source = "\
class Bad(Module):
    d = In(bit[4])
    y = Out(bit)
    y = d[4]
";
        let comp = compile_any(source);
        assert_eq!(comp.diagnostics[0].kind, DiagnosticKind::IndexOutOfBounds);
        assert!(comp.modules.is_empty());
    }

    #[test]
    fn test_unknown_port_rejected() {
        let source = "\
class Inner(Module):
    d = In(bit[4])
    q = Out(bit[4])
    q = d

class Outer(Module):
    x = In(bit[4])
    u = Inner()
    u.nope = x
";
        let comp = compile_any(source);
        let err = comp
            .diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
            .unwrap();
        assert_eq!(err.kind, DiagnosticKind::UnknownPort);
        assert_eq!(err.module.as_deref(), Some("Outer"));
    }

    #[test]
    fn test_undeclared_name_in_expression() {
        let source = "\
class Bad(Module):
    y = Out(bit[4])
    y = mystery + 1
";
        let comp = compile_any(source);
        assert_eq!(comp.diagnostics[0].kind, DiagnosticKind::UndeclaredName);
    }

    #[test]
    fn test_enum_width_from_max_value() {
        let source = "\
class Fsm(Module):
    clk = In(bit)
    class State(Enum):
        RED = 0
        GREEN = 1
        YELLOW = 2
    state = State
    if clk.posedge:
        state = State.GREEN
";
        let comp = compile_ok(source);
        let module = &comp.modules[0];
        assert_eq!(module.enums["State"].width, 2);
        assert_eq!(module.signals[0].shape, Shape::Enum("State".into()));
    }

    #[test]
    fn test_implicit_signal_from_first_assignment() {
        let source = "\
class Imp(Module):
    a = In(bit[6])
    tmp = a
    y = Out(bit[6])
    y = tmp
";
        let comp = compile_ok(source);
        let module = &comp.modules[0];
        assert_eq!(module.signals[0].name, "tmp");
        assert_eq!(module.signals[0].shape, Shape::Vector(6));
    }

    #[test]
    fn test_truncation_warning() {
        let source = "\
class Warn(Module):
    a = In(bit[8])
    y = Out(bit[4])
    y = a
";
        let comp = compile_any(source);
        assert!(!comp.failed);
        assert!(comp
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::WidthMismatch
                && d.severity == Severity::Warning));
    }

    #[test]
    fn test_missing_default_warning() {
        let source = "\
class Latchy(Module):
    en = In(bit)
    y = Out(bit)
    if en:
        y = 1
";
        let comp = compile_any(source);
        assert!(!comp.failed);
        assert!(comp
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::MissingDefault));
    }

    #[test]
    fn test_default_suppresses_latch_warning() {
        let source = "\
class Fine(Module):
    en = In(bit)
    y = Out(bit)
    y = 0
    if en:
        y = 1
";
        let comp = compile_ok(source);
        assert!(comp
            .diagnostics
            .iter()
            .all(|d| d.kind != DiagnosticKind::MissingDefault));
    }

    #[test]
    fn test_duplicate_module_reported() {
        let source = "\
class A(Module):
    x = Out(bit)
    x = 0

class A(Module):
    y = Out(bit)
    y = 0
";
        let comp = compile_any(source);
        assert!(comp
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::DuplicateDefinition));
    }

    #[test]
    fn test_sequential_grouping_by_edge_tuple() {
        let source = "\
class Grouped(Module):
    clk = In(bit)
    rst_n = In(bit)
    a = bit[4]
    b = bit[4]
    if clk.posedge or rst_n.negedge:
        a = 1
    if clk.posedge or rst_n.negedge:
        b = 2
";
        let comp = compile_ok(source);
        let module = &comp.modules[0];
        assert_eq!(module.seq_blocks.len(), 1);
        assert_eq!(module.seq_blocks[0].body.len(), 2);
        assert_eq!(module.seq_blocks[0].edges.len(), 2);
        assert_eq!(module.seq_blocks[0].edges[1].polarity, EdgePolarity::Neg);
    }

    #[test]
    fn test_parameters_recorded_for_localparam() {
        let source = "\
class Fifo(Module):
    DEPTH = 16
    WIDTH = 8
    din = In(bit[WIDTH])
    dout = Out(bit[WIDTH])
    dout = din
";
        let comp = compile_ok(source);
        let module = &comp.modules[0];
        assert_eq!(module.parameters.get("DEPTH"), Some(&16));
        assert_eq!(module.parameters.get("WIDTH"), Some(&8));
        assert_eq!(module.ports[0].shape, Shape::Vector(8));
    }

    #[test]
    fn test_memory_declaration_and_element_access() {
        let source = "\
class Ram(Module):
    clk = In(bit)
    we = In(bit)
    addr = In(bit[4])
    wdata = In(bit[8])
    rdata = Out(bit[8])
    mem = bit[16][8]
    if clk.posedge:
        if we:
            mem[addr] = wdata
    rdata = mem[addr]
";
        let comp = compile_ok(source);
        let module = &comp.modules[0];
        assert_eq!(
            module.signals[0].shape,
            Shape::Memory {
                depth: 16,
                width: 8
            }
        );
        assert_eq!(module.seq_blocks.len(), 1);
        assert_eq!(module.comb.len(), 1);
    }
}
