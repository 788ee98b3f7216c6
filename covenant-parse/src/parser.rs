#![forbid(unsafe_code)]

use std::mem;

use covenant_ast::{
    join, span_between, Annotation, AnnotationKind, AssignOp, BinOp, Block, CapabilityDecl,
    ContractDecl, Decl, ElseBranch, EnumDecl, ExportDecl, Expr, ExprKind, FieldDecl, FnDecl,
    ForStmt, GenericParam, Ident, IfStmt, ImplDecl, ImportDecl, ImportItem, ImportItems,
    IntentDecl, LambdaParam, LetDecl, Literal, MatchArm, MatchStmt, Param, Pattern, Program,
    QuantBinder, ReturnStmt, Spanned, Stmt, StructDecl, TraitDecl, TypeAliasDecl, TypeExpr,
    TypeExprKind, UnaryOp, VariantDecl, WhileStmt, EffectDecl,
};
use covenant_lex::{Token, TokenKind};

use crate::error::ParseError;

pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    errors: Vec<ParseError>,
    /// Struct literals are ambiguous with block-opening braces in `if`/`while`/
    /// `for`/`match` heads; they are disabled there.
    no_struct_lit: bool,
}

impl Parser {
    /// `Invalid` tokens from scanner recovery are filtered out here; the
    /// remaining stream is what the grammar sees.
    pub fn new(tokens: &[Token]) -> Self {
        let tokens = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Invalid)
            .cloned()
            .collect();
        Self {
            tokens,
            idx: 0,
            errors: Vec::new(),
            no_struct_lit: false,
        }
    }

    /// Parse a whole program, recovering at declaration boundaries.
    ///
    /// On a declaration parse error the parser records the diagnostic and
    /// skips past the next `;` or to the next token that can begin a
    /// declaration, then resumes.
    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut decls = Vec::new();

        while !self.at(TokenKind::Eof) {
            match self.parse_decl() {
                Ok(decl) => decls.push(decl),
                Err(err) => {
                    self.errors.push(err);
                    self.sync_to_decl();
                }
            }
        }

        (Program { decls }, mem::take(&mut self.errors))
    }

    pub fn parse_expr_eof(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        if !self.at(TokenKind::Eof) {
            return Err(self.err_here("expected end of input"));
        }
        Ok(expr)
    }

    fn sync_to_decl(&mut self) {
        while !self.at(TokenKind::Eof) {
            if self.at(TokenKind::Semi) {
                self.next();
                return;
            }
            if self.peek_kind().is_some_and(starts_decl) {
                return;
            }
            self.next();
        }
    }

    fn sync_in_block(&mut self) {
        while !self.at(TokenKind::Eof) && !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Semi) {
                self.next();
                return;
            }
            if self
                .peek_kind()
                .is_some_and(|k| starts_decl(k) || starts_stmt(k))
            {
                return;
            }
            self.next();
        }
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    fn parse_decl(&mut self) -> Result<Decl, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwExport) => {
                let kw = self.next().unwrap();
                let mut decl = self.parse_decl()?;
                if let Decl::Function(f) = &mut decl {
                    f.exported = true;
                }
                let span = join(kw.span, decl.span());
                Ok(Decl::Export(ExportDecl {
                    span,
                    decl: Box::new(decl),
                }))
            }
            Some(TokenKind::KwPure) => {
                let kw = self.next().unwrap();
                let mut f = self.parse_fn_decl()?;
                f.span = join(kw.span, f.span);
                f.is_pure = true;
                Ok(Decl::Function(f))
            }
            Some(TokenKind::KwExtern) => {
                let kw = self.next().unwrap();
                let mut f = self.parse_fn_decl()?;
                f.span = join(kw.span, f.span);
                f.is_extern = true;
                Ok(Decl::Function(f))
            }
            Some(TokenKind::KwFn) => Ok(Decl::Function(self.parse_fn_decl()?)),
            Some(TokenKind::KwLet) => Ok(Decl::Variable(self.parse_let_decl()?)),
            Some(TokenKind::KwType) => Ok(Decl::TypeAlias(self.parse_type_alias()?)),
            Some(TokenKind::KwStruct) => Ok(Decl::Struct(self.parse_struct_decl()?)),
            Some(TokenKind::KwEnum) => Ok(Decl::Enum(self.parse_enum_decl()?)),
            Some(TokenKind::KwTrait) => Ok(Decl::Trait(self.parse_trait_decl()?)),
            Some(TokenKind::KwImpl) => Ok(Decl::Impl(self.parse_impl_decl()?)),
            Some(TokenKind::KwContract) => Ok(Decl::Contract(self.parse_contract_decl()?)),
            Some(TokenKind::KwIntent) => Ok(Decl::Intent(self.parse_intent_decl()?)),
            Some(TokenKind::KwEffect) => Ok(Decl::Effect(self.parse_effect_decl()?)),
            Some(TokenKind::KwCapability) => Ok(Decl::Capability(self.parse_capability_decl()?)),
            Some(TokenKind::KwImport) => Ok(Decl::Import(self.parse_import_decl()?)),
            _ => Err(self.err_here("expected a declaration")),
        }
    }

    fn parse_fn_decl(&mut self) -> Result<FnDecl, ParseError> {
        let kw = self.expect(TokenKind::KwFn)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;

        let ret = if self.at(TokenKind::Arrow) {
            self.next();
            Some(self.parse_type()?)
        } else {
            None
        };

        let annotations = self.parse_annotations();

        let (body, end_span) = if self.at(TokenKind::Semi) {
            let semi = self.next().unwrap();
            (None, semi.span)
        } else {
            let block = self.parse_block()?;
            let span = block.span;
            (Some(block), span)
        };

        Ok(FnDecl {
            span: join(kw.span, end_span),
            name,
            generics,
            params,
            ret,
            annotations,
            body,
            is_pure: false,
            is_extern: false,
            exported: false,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            if self.at(TokenKind::KwSelf) {
                let tok = self.next().unwrap();
                params.push(Param {
                    span: tok.span,
                    name: Spanned::new(tok.span, "self".to_string()),
                    ty: TypeExpr {
                        span: tok.span,
                        kind: TypeExprKind::Named {
                            name: Spanned::new(tok.span, "Self".to_string()),
                            args: Vec::new(),
                        },
                    },
                    mutable: false,
                });
            } else {
                // Mutability may be written either side of the colon:
                // `mut x: Int` or `x: mut Int`.
                let mut mutable = if self.at(TokenKind::KwMut) {
                    self.next();
                    true
                } else {
                    false
                };
                let name = self.expect_ident()?;
                self.expect(TokenKind::Colon)?;
                if self.at(TokenKind::KwMut) {
                    self.next();
                    mutable = true;
                }
                let ty = self.parse_type()?;
                let span = join(name.span, ty.span);
                params.push(Param {
                    span,
                    name,
                    ty,
                    mutable,
                });
            }
            if self.at(TokenKind::Comma) {
                self.next();
                if self.at(TokenKind::RParen) {
                    break;
                }
                continue;
            }
            break;
        }
        Ok(params)
    }

    fn parse_generic_params(&mut self) -> Result<Vec<GenericParam>, ParseError> {
        let mut out = Vec::new();
        if !self.at(TokenKind::Lt) {
            return Ok(out);
        }
        self.next();
        loop {
            let name = self.expect_ident()?;
            let mut bounds = Vec::new();
            if self.at(TokenKind::Colon) {
                self.next();
                loop {
                    bounds.push(self.parse_type()?);
                    if self.at(TokenKind::Plus) {
                        self.next();
                        continue;
                    }
                    break;
                }
            }
            let default = if self.at(TokenKind::Eq) {
                self.next();
                Some(self.parse_type()?)
            } else {
                None
            };
            let span = match (&bounds.last(), &default) {
                (_, Some(d)) => join(name.span, d.span),
                (Some(b), None) => join(name.span, b.span),
                (None, None) => name.span,
            };
            out.push(GenericParam {
                span,
                name,
                bounds,
                default,
            });
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        self.close_generic()?;
        Ok(out)
    }

    fn parse_let_decl(&mut self) -> Result<LetDecl, ParseError> {
        let kw = self.expect(TokenKind::KwLet)?;
        let mutable = if self.at(TokenKind::KwMut) {
            self.next();
            true
        } else {
            false
        };
        let name = self.expect_ident()?;
        let ty = if self.at(TokenKind::Colon) {
            self.next();
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.at(TokenKind::Eq) {
            self.next();
            Some(self.parse_expr()?)
        } else {
            None
        };
        let semi = self.expect(TokenKind::Semi)?;
        Ok(LetDecl {
            span: join(kw.span, semi.span),
            name,
            mutable,
            ty,
            init,
        })
    }

    fn parse_type_alias(&mut self) -> Result<TypeAliasDecl, ParseError> {
        let kw = self.expect(TokenKind::KwType)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;
        self.expect(TokenKind::Eq)?;
        let target = self.parse_type()?;
        let semi = self.expect(TokenKind::Semi)?;
        Ok(TypeAliasDecl {
            span: join(kw.span, semi.span),
            name,
            generics,
            target,
        })
    }

    fn parse_struct_decl(&mut self) -> Result<StructDecl, ParseError> {
        let kw = self.expect(TokenKind::KwStruct)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        let mut annotations = Vec::new();
        loop {
            while self.at(TokenKind::Comma) {
                self.next();
            }
            if self.at(TokenKind::RBrace) {
                break;
            }
            let anns = self.parse_annotations();
            if matches!(self.peek_kind(), Some(TokenKind::Ident(_))) {
                let fname = self.expect_ident()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                let default = if self.at(TokenKind::Eq) {
                    self.next();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                let span = join(fname.span, ty.span);
                fields.push(FieldDecl {
                    span,
                    name: fname,
                    ty,
                    default,
                    annotations: anns,
                });
            } else {
                // Bare annotations apply to the struct itself (invariants).
                if anns.is_empty() {
                    return Err(self.err_here("expected a field or an annotation"));
                }
                annotations.extend(anns);
            }
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(StructDecl {
            span: join(kw.span, rb.span),
            name,
            generics,
            fields,
            annotations,
        })
    }

    fn parse_enum_decl(&mut self) -> Result<EnumDecl, ParseError> {
        let kw = self.expect(TokenKind::KwEnum)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;
        self.expect(TokenKind::LBrace)?;

        let mut variants = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            let vname = self.expect_ident()?;
            let mut vfields = Vec::new();
            let mut span = vname.span;
            if self.at(TokenKind::LParen) {
                self.next();
                while !self.at(TokenKind::RParen) {
                    vfields.push(self.parse_type()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rp = self.expect(TokenKind::RParen)?;
                span = join(span, rp.span);
            }
            variants.push(VariantDecl {
                span,
                name: vname,
                fields: vfields,
            });
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(EnumDecl {
            span: join(kw.span, rb.span),
            name,
            generics,
            variants,
        })
    }

    fn parse_trait_decl(&mut self) -> Result<TraitDecl, ParseError> {
        let kw = self.expect(TokenKind::KwTrait)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;

        let mut supers = Vec::new();
        if self.at(TokenKind::Colon) {
            self.next();
            loop {
                supers.push(self.expect_ident()?);
                if self.at(TokenKind::Plus) {
                    self.next();
                    continue;
                }
                break;
            }
        }

        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while self.at(TokenKind::KwFn) || self.at(TokenKind::KwPure) {
            let is_pure = if self.at(TokenKind::KwPure) {
                self.next();
                true
            } else {
                false
            };
            let mut m = self.parse_fn_decl()?;
            m.is_pure = is_pure;
            methods.push(m);
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(TraitDecl {
            span: join(kw.span, rb.span),
            name,
            generics,
            supers,
            methods,
        })
    }

    fn parse_impl_decl(&mut self) -> Result<ImplDecl, ParseError> {
        let kw = self.expect(TokenKind::KwImpl)?;
        let first = self.parse_type()?;

        let (trait_name, target) = if self.at(TokenKind::KwFor) {
            self.next();
            let span = first.span;
            let trait_name = match first.kind {
                TypeExprKind::Named { name, args } if args.is_empty() => name,
                _ => {
                    return Err(ParseError {
                        message: "expected a trait name before 'for'".to_string(),
                        span,
                    });
                }
            };
            let target = self.parse_type()?;
            (Some(trait_name), target)
        } else {
            (None, first)
        };

        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while self.at(TokenKind::KwFn) || self.at(TokenKind::KwPure) {
            let is_pure = if self.at(TokenKind::KwPure) {
                self.next();
                true
            } else {
                false
            };
            let mut m = self.parse_fn_decl()?;
            m.is_pure = is_pure;
            methods.push(m);
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(ImplDecl {
            span: join(kw.span, rb.span),
            trait_name,
            target,
            methods,
        })
    }

    fn parse_contract_decl(&mut self) -> Result<ContractDecl, ParseError> {
        let kw = self.expect(TokenKind::KwContract)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;
        self.expect(TokenKind::LBrace)?;
        let clauses = self.parse_annotations();
        let rb = self.expect(TokenKind::RBrace)?;
        Ok(ContractDecl {
            span: join(kw.span, rb.span),
            name,
            generics,
            clauses,
        })
    }

    fn parse_intent_decl(&mut self) -> Result<IntentDecl, ParseError> {
        let kw = self.expect(TokenKind::KwIntent)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;
        self.expect(TokenKind::LBrace)?;
        let clauses = self.parse_annotations();
        let rb = self.expect(TokenKind::RBrace)?;
        Ok(IntentDecl {
            span: join(kw.span, rb.span),
            name,
            generics,
            clauses,
        })
    }

    fn parse_effect_decl(&mut self) -> Result<EffectDecl, ParseError> {
        let kw = self.expect(TokenKind::KwEffect)?;
        let name = self.expect_ident()?;
        let generics = self.parse_generic_params()?;
        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while self.at(TokenKind::KwFn) {
            let m = self.parse_fn_decl()?;
            // Effect bodies hold method signatures only; handlers come from
            // the runtime.
            if m.body.is_some() {
                self.errors.push(ParseError {
                    message: format!("effect method '{}' may not have a body", m.name.node),
                    span: m.span,
                });
            }
            methods.push(m);
        }
        let rb = self.expect(TokenKind::RBrace)?;
        Ok(EffectDecl {
            span: join(kw.span, rb.span),
            name,
            generics,
            methods,
        })
    }

    fn parse_capability_decl(&mut self) -> Result<CapabilityDecl, ParseError> {
        let kw = self.expect(TokenKind::KwCapability)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut permissions = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            let pname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            let span = join(pname.span, ty.span);
            permissions.push(FieldDecl {
                span,
                name: pname,
                ty,
                default: None,
                annotations: Vec::new(),
            });
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        let rb = self.expect(TokenKind::RBrace)?;
        Ok(CapabilityDecl {
            span: join(kw.span, rb.span),
            name,
            permissions,
        })
    }

    fn parse_import_decl(&mut self) -> Result<ImportDecl, ParseError> {
        let kw = self.expect(TokenKind::KwImport)?;
        let mut path = vec![self.expect_ident()?];
        let mut items = ImportItems::Module;

        while self.at(TokenKind::Dot) {
            self.next();
            match self.peek_kind() {
                Some(TokenKind::Star) => {
                    self.next();
                    items = ImportItems::Wildcard;
                    break;
                }
                Some(TokenKind::LBrace) => {
                    self.next();
                    let mut list = Vec::new();
                    while !self.at(TokenKind::RBrace) {
                        let name = self.expect_ident()?;
                        let alias = if self.at(TokenKind::KwAs) {
                            self.next();
                            Some(self.expect_ident()?)
                        } else {
                            None
                        };
                        let span = match &alias {
                            Some(a) => join(name.span, a.span),
                            None => name.span,
                        };
                        list.push(ImportItem { span, name, alias });
                        if self.at(TokenKind::Comma) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                    self.expect(TokenKind::RBrace)?;
                    items = ImportItems::List(list);
                    break;
                }
                _ => path.push(self.expect_ident()?),
            }
        }

        let semi = self.expect(TokenKind::Semi)?;
        Ok(ImportDecl {
            span: join(kw.span, semi.span),
            path,
            items,
        })
    }

    // -----------------------------------------------------------------------
    // Annotations
    // -----------------------------------------------------------------------

    /// Zero or more `@...` annotations. Unknown annotation names are reported
    /// and skipped without failing the surrounding declaration.
    fn parse_annotations(&mut self) -> Vec<Annotation> {
        let mut out = Vec::new();
        while self.at(TokenKind::At) {
            match self.parse_annotation() {
                Ok(Some(ann)) => out.push(ann),
                Ok(None) => {}
                Err(err) => {
                    self.errors.push(err);
                    return out;
                }
            }
        }
        out
    }

    fn parse_annotation(&mut self) -> Result<Option<Annotation>, ParseError> {
        let at = self.expect(TokenKind::At)?;
        match self.peek_kind().cloned() {
            // Clause conditions may be followed directly by a `{` body, so
            // struct literals are disabled just like in condition heads.
            Some(TokenKind::KwRequires) => {
                self.next();
                let expr = self.parse_no_struct_expr()?;
                let span = join(at.span, expr.span);
                Ok(Some(Annotation {
                    span,
                    kind: AnnotationKind::Requires(expr),
                }))
            }
            Some(TokenKind::KwEnsures) => {
                self.next();
                let expr = self.parse_no_struct_expr()?;
                let span = join(at.span, expr.span);
                Ok(Some(Annotation {
                    span,
                    kind: AnnotationKind::Ensures(expr),
                }))
            }
            Some(TokenKind::KwInvariant) => {
                self.next();
                let expr = self.parse_no_struct_expr()?;
                let span = join(at.span, expr.span);
                Ok(Some(Annotation {
                    span,
                    kind: AnnotationKind::Invariant(expr),
                }))
            }
            Some(TokenKind::KwEffect) => {
                self.next();
                self.expect(TokenKind::LBracket)?;
                let mut effects = Vec::new();
                while !self.at(TokenKind::RBracket) {
                    effects.push(self.expect_ident()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rb = self.expect(TokenKind::RBracket)?;
                Ok(Some(Annotation {
                    span: join(at.span, rb.span),
                    kind: AnnotationKind::Effects(effects),
                }))
            }
            Some(TokenKind::KwCapability) => {
                self.next();
                let name = self.expect_ident()?;
                let mut fields = Vec::new();
                let mut end = name.span;
                if self.at(TokenKind::LBrace) {
                    self.next();
                    while !self.at(TokenKind::RBrace) {
                        let fname = self.expect_ident()?;
                        self.expect(TokenKind::Colon)?;
                        let value = self.parse_expr()?;
                        fields.push((fname, value));
                        if self.at(TokenKind::Comma) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                    end = self.expect(TokenKind::RBrace)?.span;
                }
                Ok(Some(Annotation {
                    span: join(at.span, end),
                    kind: AnnotationKind::Capability { name, fields },
                }))
            }
            Some(TokenKind::KwContract) => {
                self.next();
                let name = self.expect_ident()?;
                let args = self.parse_generic_args()?;
                let end = args.last().map(|t| t.span).unwrap_or(name.span);
                Ok(Some(Annotation {
                    span: join(at.span, end),
                    kind: AnnotationKind::Contract { name, args },
                }))
            }
            Some(TokenKind::KwIntent) => {
                self.next();
                let name = self.expect_ident()?;
                let args = self.parse_generic_args()?;
                let end = args.last().map(|t| t.span).unwrap_or(name.span);
                Ok(Some(Annotation {
                    span: join(at.span, end),
                    kind: AnnotationKind::Intent { name, args },
                }))
            }
            Some(TokenKind::Ident(name)) if name == "verify" => {
                self.next();
                self.expect(TokenKind::LParen)?;
                let key = self.expect_ident()?;
                if key.node != "level" {
                    return Err(ParseError {
                        message: "expected 'level' in @verify".to_string(),
                        span: key.span,
                    });
                }
                self.expect(TokenKind::Colon)?;
                let tok = self.expect_any()?;
                let level = match tok.kind {
                    TokenKind::Str(s) if matches!(s.as_str(), "full" | "runtime" | "trusted") => {
                        Spanned::new(tok.span, s)
                    }
                    _ => {
                        return Err(ParseError {
                            message: "verify level must be \"full\", \"runtime\" or \"trusted\""
                                .to_string(),
                            span: tok.span,
                        });
                    }
                };
                let rp = self.expect(TokenKind::RParen)?;
                Ok(Some(Annotation {
                    span: join(at.span, rp.span),
                    kind: AnnotationKind::Verify(level),
                }))
            }
            Some(TokenKind::Ident(name)) => {
                let tok = self.next().unwrap();
                self.errors.push(ParseError {
                    message: format!("unknown annotation '@{name}'"),
                    span: join(at.span, tok.span),
                });
                Ok(None)
            }
            _ => Err(self.err_here("expected an annotation name after '@'")),
        }
    }

    // -----------------------------------------------------------------------
    // Statements and blocks
    // -----------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let lb = self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        let mut tail = None;

        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            match self.parse_stmt_or_tail() {
                Ok(StmtOrTail::Stmt(stmt)) => stmts.push(stmt),
                Ok(StmtOrTail::Tail(expr)) => {
                    tail = Some(Box::new(expr));
                    break;
                }
                Err(err) => {
                    self.errors.push(err);
                    self.sync_in_block();
                }
            }
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(Block {
            span: join(lb.span, rb.span),
            stmts,
            tail,
        })
    }

    fn parse_stmt_or_tail(&mut self) -> Result<StmtOrTail, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwLet) => Ok(StmtOrTail::Stmt(Stmt::Let(self.parse_let_decl()?))),
            Some(TokenKind::KwReturn) => {
                let kw = self.next().unwrap();
                let value = if self.at(TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let semi = self.expect(TokenKind::Semi)?;
                Ok(StmtOrTail::Stmt(Stmt::Return(ReturnStmt {
                    span: join(kw.span, semi.span),
                    value,
                })))
            }
            Some(TokenKind::KwIf) => {
                let s = self.parse_if_stmt()?;
                // A block-final `if` is the block's value.
                if self.at(TokenKind::RBrace) {
                    return Ok(StmtOrTail::Tail(if_stmt_to_expr(s)));
                }
                Ok(StmtOrTail::Stmt(Stmt::If(s)))
            }
            Some(TokenKind::KwWhile) => Ok(StmtOrTail::Stmt(Stmt::While(self.parse_while_stmt()?))),
            Some(TokenKind::KwFor) => Ok(StmtOrTail::Stmt(Stmt::For(self.parse_for_stmt()?))),
            Some(TokenKind::KwMatch) => {
                let m = self.parse_match_head()?;
                // A match immediately before `}` is the block's tail value.
                if self.at(TokenKind::RBrace) && !self.at(TokenKind::Semi) {
                    let span = m.span;
                    return Ok(StmtOrTail::Tail(Expr {
                        span,
                        kind: ExprKind::Match {
                            scrutinee: Box::new(m.scrutinee),
                            arms: m.arms,
                        },
                    }));
                }
                if self.at(TokenKind::Semi) {
                    self.next();
                }
                Ok(StmtOrTail::Stmt(Stmt::Match(m)))
            }
            Some(TokenKind::LBrace) => {
                let block = self.parse_block()?;
                if self.at(TokenKind::RBrace) {
                    let span = block.span;
                    return Ok(StmtOrTail::Tail(Expr {
                        span,
                        kind: ExprKind::Block(block),
                    }));
                }
                Ok(StmtOrTail::Stmt(Stmt::Block(block)))
            }
            _ => {
                let expr = self.parse_expr()?;
                if self.at(TokenKind::Semi) {
                    self.next();
                    Ok(StmtOrTail::Stmt(Stmt::Expr(expr)))
                } else if self.at(TokenKind::RBrace) {
                    Ok(StmtOrTail::Tail(expr))
                } else if matches!(expr.kind, ExprKind::If { .. } | ExprKind::Block(_)) {
                    // Brace-terminated expressions may stand alone without ';'.
                    Ok(StmtOrTail::Stmt(Stmt::Expr(expr)))
                } else {
                    Err(self.err_here("expected ';'"))
                }
            }
        }
    }

    fn parse_if_stmt(&mut self) -> Result<IfStmt, ParseError> {
        let kw = self.expect(TokenKind::KwIf)?;
        let cond = self.parse_no_struct_expr()?;
        let then_block = self.parse_block()?;
        let mut span = join(kw.span, then_block.span);

        let else_branch = if self.at(TokenKind::KwElse) {
            self.next();
            if self.at(TokenKind::KwIf) {
                let nested = self.parse_if_stmt()?;
                span = join(span, nested.span);
                Some(ElseBranch::If(Box::new(nested)))
            } else {
                let block = self.parse_block()?;
                span = join(span, block.span);
                Some(ElseBranch::Block(block))
            }
        } else {
            None
        };

        Ok(IfStmt {
            span,
            cond,
            then_block,
            else_branch,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<WhileStmt, ParseError> {
        let kw = self.expect(TokenKind::KwWhile)?;
        let cond = self.parse_no_struct_expr()?;
        let invariants = self.parse_annotations();
        let body = self.parse_block()?;
        Ok(WhileStmt {
            span: join(kw.span, body.span),
            cond,
            invariants,
            body,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<ForStmt, ParseError> {
        let kw = self.expect(TokenKind::KwFor)?;
        let binding = self.expect_ident()?;
        self.expect(TokenKind::KwIn)?;
        let iterable = self.parse_no_struct_expr()?;
        let invariants = self.parse_annotations();
        let body = self.parse_block()?;
        Ok(ForStmt {
            span: join(kw.span, body.span),
            binding,
            iterable,
            invariants,
            body,
        })
    }

    fn parse_match_head(&mut self) -> Result<MatchStmt, ParseError> {
        let kw = self.expect(TokenKind::KwMatch)?;
        let scrutinee = self.parse_no_struct_expr()?;
        self.expect(TokenKind::LBrace)?;

        let mut arms = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            let pattern = self.parse_pattern()?;
            let guard = if self.at(TokenKind::KwIf) {
                self.next();
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(TokenKind::FatArrow)?;
            let body = self.parse_expr()?;
            let span = join(pattern.span(), body.span);
            arms.push(MatchArm {
                span,
                pattern,
                guard,
                body,
            });
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(MatchStmt {
            span: join(kw.span, rb.span),
            scrutinee,
            arms,
        })
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        let first = self.parse_pattern_primary()?;

        // Range patterns over literal endpoints.
        if self.at(TokenKind::DotDot) || self.at(TokenKind::DotDotEq) {
            let inclusive = self.at(TokenKind::DotDotEq);
            self.next();
            let end = self.parse_pattern_primary()?;
            let span = join(first.span(), end.span());
            return Ok(Pattern::Range {
                span,
                start: Box::new(first),
                end: Box::new(end),
                inclusive,
            });
        }

        Ok(first)
    }

    fn parse_pattern_primary(&mut self) -> Result<Pattern, ParseError> {
        match self.peek_kind().cloned() {
            Some(TokenKind::Underscore) => {
                let tok = self.next().unwrap();
                Ok(Pattern::Wildcard { span: tok.span })
            }
            Some(TokenKind::KwMut) => {
                let kw = self.next().unwrap();
                let name = self.expect_ident()?;
                let span = join(kw.span, name.span);
                Ok(Pattern::Binding {
                    span,
                    name,
                    mutable: true,
                })
            }
            Some(TokenKind::Minus) => {
                let minus = self.next().unwrap();
                let tok = self.expect_any()?;
                let value = match tok.kind {
                    TokenKind::Int(n) => Literal::Int(-n),
                    TokenKind::Float(v) => Literal::Float(-v),
                    _ => {
                        return Err(ParseError {
                            message: "expected a numeric literal after '-'".to_string(),
                            span: tok.span,
                        });
                    }
                };
                Ok(Pattern::Literal {
                    span: join(minus.span, tok.span),
                    value,
                })
            }
            Some(
                TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Char(_)
                | TokenKind::Bool(_)
                | TokenKind::Nil,
            ) => {
                let tok = self.next().unwrap();
                let value = match tok.kind {
                    TokenKind::Int(n) => Literal::Int(n),
                    TokenKind::Float(v) => Literal::Float(v),
                    TokenKind::Str(s) => Literal::Str(s),
                    TokenKind::Char(c) => Literal::Char(c),
                    TokenKind::Bool(b) => Literal::Bool(b),
                    TokenKind::Nil => Literal::Nil,
                    _ => unreachable!(),
                };
                Ok(Pattern::Literal {
                    span: tok.span,
                    value,
                })
            }
            Some(TokenKind::LParen) => {
                let lp = self.next().unwrap();
                let mut items = Vec::new();
                while !self.at(TokenKind::RParen) {
                    items.push(self.parse_pattern()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rp = self.expect(TokenKind::RParen)?;
                Ok(Pattern::Tuple {
                    span: join(lp.span, rp.span),
                    items,
                })
            }
            Some(TokenKind::Ident(_)) => {
                let name = self.expect_ident()?;

                if self.at(TokenKind::ColonColon) {
                    self.next();
                    let variant = self.expect_ident()?;
                    let mut fields = Vec::new();
                    let mut span = join(name.span, variant.span);
                    if self.at(TokenKind::LParen) {
                        self.next();
                        while !self.at(TokenKind::RParen) {
                            fields.push(self.parse_pattern()?);
                            if self.at(TokenKind::Comma) {
                                self.next();
                                continue;
                            }
                            break;
                        }
                        let rp = self.expect(TokenKind::RParen)?;
                        span = join(span, rp.span);
                    }
                    return Ok(Pattern::Variant {
                        span,
                        enum_name: name,
                        variant,
                        fields,
                    });
                }

                if self.at(TokenKind::LBrace) {
                    self.next();
                    let mut fields = Vec::new();
                    let mut rest = false;
                    while !self.at(TokenKind::RBrace) {
                        if self.at(TokenKind::DotDot) {
                            self.next();
                            rest = true;
                            break;
                        }
                        let fname = self.expect_ident()?;
                        let sub = if self.at(TokenKind::Colon) {
                            self.next();
                            Some(self.parse_pattern()?)
                        } else {
                            None
                        };
                        fields.push((fname, sub));
                        if self.at(TokenKind::Comma) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                    let rb = self.expect(TokenKind::RBrace)?;
                    return Ok(Pattern::Struct {
                        span: join(name.span, rb.span),
                        name,
                        fields,
                        rest,
                    });
                }

                let span = name.span;
                Ok(Pattern::Binding {
                    span,
                    name,
                    mutable: false,
                })
            }
            _ => Err(self.err_here("expected a pattern")),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assign_expr()
    }

    fn parse_no_struct_expr(&mut self) -> Result<Expr, ParseError> {
        let saved = self.no_struct_lit;
        self.no_struct_lit = true;
        let out = self.parse_expr();
        self.no_struct_lit = saved;
        out
    }

    /// Bracketed sub-expressions lift the struct-literal restriction.
    fn parse_expr_allow_struct(&mut self) -> Result<Expr, ParseError> {
        let saved = self.no_struct_lit;
        self.no_struct_lit = false;
        let out = self.parse_expr();
        self.no_struct_lit = saved;
        out
    }

    fn parse_assign_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_range_expr()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Eq) => Some(AssignOp::Assign),
            Some(TokenKind::PlusEq) => Some(AssignOp::Add),
            Some(TokenKind::MinusEq) => Some(AssignOp::Sub),
            Some(TokenKind::StarEq) => Some(AssignOp::Mul),
            Some(TokenKind::SlashEq) => Some(AssignOp::Div),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        self.next();
        // Right-associative.
        let value = self.parse_assign_expr()?;
        let span = join(left.span, value.span);
        Ok(Expr {
            span,
            kind: ExprKind::Assign {
                op,
                target: Box::new(left),
                value: Box::new(value),
            },
        })
    }

    fn parse_range_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_or_expr()?;
        if self.at(TokenKind::DotDot) || self.at(TokenKind::DotDotEq) {
            let inclusive = self.at(TokenKind::DotDotEq);
            self.next();
            let end = self.parse_or_expr()?;
            let span = join(left.span, end.span);
            return Ok(Expr {
                span,
                kind: ExprKind::Range {
                    start: Box::new(left),
                    end: Box::new(end),
                    inclusive,
                },
            });
        }
        Ok(left)
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expr()?;
        while self.at(TokenKind::OrOr) {
            self.next();
            let right = self.parse_and_expr()?;
            left = bin(left, BinOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality_expr()?;
        while self.at(TokenKind::AndAnd) {
            self.next();
            let right = self.parse_equality_expr()?;
            left = bin(left, BinOp::And, right);
        }
        Ok(left)
    }

    fn parse_equality_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_ordering_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.next();
            let right = self.parse_ordering_expr()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_ordering_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitor_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::Le) => BinOp::Le,
                Some(TokenKind::Ge) => BinOp::Ge,
                _ => break,
            };
            self.next();
            let right = self.parse_bitor_expr()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_bitor_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitxor_expr()?;
        while self.at(TokenKind::Pipe) {
            self.next();
            let right = self.parse_bitxor_expr()?;
            left = bin(left, BinOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bitxor_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitand_expr()?;
        while self.at(TokenKind::Caret) {
            self.next();
            let right = self.parse_bitand_expr()?;
            left = bin(left, BinOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_bitand_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_shift_expr()?;
        while self.at(TokenKind::Amp) {
            self.next();
            let right = self.parse_shift_expr()?;
            left = bin(left, BinOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_add_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Shl) => BinOp::Shl,
                Some(TokenKind::Shr) => BinOp::Shr,
                _ => break,
            };
            self.next();
            let right = self.parse_add_expr()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_mul_expr()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_pow_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            self.next();
            let right = self.parse_pow_expr()?;
            left = bin(left, op, right);
        }
        Ok(left)
    }

    fn parse_pow_expr(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_unary_expr()?;
        if self.at(TokenKind::StarStar) {
            self.next();
            // Right-associative.
            let exp = self.parse_pow_expr()?;
            return Ok(bin(base, BinOp::Pow, exp));
        }
        Ok(base)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => Some(UnaryOp::Neg),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            Some(TokenKind::Tilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let tok = self.next().unwrap();
            let expr = self.parse_unary_expr()?;
            let span = join(tok.span, expr.span);
            return Ok(Expr {
                span,
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
            });
        }

        if self.at(TokenKind::Amp) {
            let tok = self.next().unwrap();
            let mutable = if self.at(TokenKind::KwMut) {
                self.next();
                true
            } else {
                false
            };
            let expr = self.parse_unary_expr()?;
            let span = join(tok.span, expr.span);
            return Ok(Expr {
                span,
                kind: ExprKind::Reference {
                    mutable,
                    expr: Box::new(expr),
                },
            });
        }

        if self.at(TokenKind::Star) {
            let tok = self.next().unwrap();
            let expr = self.parse_unary_expr()?;
            let span = join(tok.span, expr.span);
            return Ok(Expr {
                span,
                kind: ExprKind::Deref(Box::new(expr)),
            });
        }

        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            if self.at(TokenKind::LParen) {
                self.next();
                let mut args = Vec::new();
                while !self.at(TokenKind::RParen) {
                    args.push(self.parse_expr_allow_struct()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rp = self.expect(TokenKind::RParen)?;
                let span = join(expr.span, rp.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
                continue;
            }

            if self.at(TokenKind::LBracket) {
                self.next();
                let index = self.parse_expr_allow_struct()?;
                let rb = self.expect(TokenKind::RBracket)?;
                let span = join(expr.span, rb.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                };
                continue;
            }

            if self.at(TokenKind::Dot) {
                self.next();
                // `t.0` accesses a tuple element; `x.field` a member.
                if let Some(TokenKind::Int(n)) = self.peek_kind().cloned() {
                    let tok = self.next().unwrap();
                    let span = join(expr.span, tok.span);
                    expr = Expr {
                        span,
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(Expr {
                                span: tok.span,
                                kind: ExprKind::Literal(Literal::Int(n)),
                            }),
                        },
                    };
                } else {
                    let member = self.expect_ident()?;
                    let span = join(expr.span, member.span);
                    expr = Expr {
                        span,
                        kind: ExprKind::Member {
                            base: Box::new(expr),
                            member,
                        },
                    };
                }
                continue;
            }

            if self.at(TokenKind::Question) {
                let tok = self.next().unwrap();
                let span = join(expr.span, tok.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Try(Box::new(expr)),
                };
                continue;
            }

            if self.at(TokenKind::KwAs) {
                self.next();
                let ty = self.parse_type()?;
                let span = join(expr.span, ty.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Cast {
                        expr: Box::new(expr),
                        ty,
                    },
                };
                continue;
            }

            break;
        }
        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind().cloned() {
            Some(
                TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Char(_)
                | TokenKind::Bool(_)
                | TokenKind::Nil,
            ) => {
                let tok = self.next().unwrap();
                let lit = match tok.kind {
                    TokenKind::Int(n) => Literal::Int(n),
                    TokenKind::Float(v) => Literal::Float(v),
                    TokenKind::Str(s) => Literal::Str(s),
                    TokenKind::Char(c) => Literal::Char(c),
                    TokenKind::Bool(b) => Literal::Bool(b),
                    TokenKind::Nil => Literal::Nil,
                    _ => unreachable!(),
                };
                Ok(Expr {
                    span: tok.span,
                    kind: ExprKind::Literal(lit),
                })
            }
            Some(TokenKind::KwSelf) => {
                let tok = self.next().unwrap();
                Ok(Expr {
                    span: tok.span,
                    kind: ExprKind::SelfRef,
                })
            }
            Some(TokenKind::KwOld) => {
                let kw = self.next().unwrap();
                self.expect(TokenKind::LParen)?;
                let inner = self.parse_expr()?;
                let rp = self.expect(TokenKind::RParen)?;
                Ok(Expr {
                    span: join(kw.span, rp.span),
                    kind: ExprKind::Old(Box::new(inner)),
                })
            }
            Some(TokenKind::KwForall) => self.parse_quantifier(true),
            Some(TokenKind::KwExists) => self.parse_quantifier(false),
            Some(TokenKind::KwIf) => {
                let kw = self.expect(TokenKind::KwIf)?;
                let cond = self.parse_no_struct_expr()?;
                let then_block = self.parse_block()?;
                let mut span = join(kw.span, then_block.span);
                let else_block = if self.at(TokenKind::KwElse) {
                    self.next();
                    let block = self.parse_block()?;
                    span = join(span, block.span);
                    Some(block)
                } else {
                    None
                };
                Ok(Expr {
                    span,
                    kind: ExprKind::If {
                        cond: Box::new(cond),
                        then_block,
                        else_block,
                    },
                })
            }
            Some(TokenKind::KwMatch) => {
                let m = self.parse_match_head()?;
                Ok(Expr {
                    span: m.span,
                    kind: ExprKind::Match {
                        scrutinee: Box::new(m.scrutinee),
                        arms: m.arms,
                    },
                })
            }
            Some(TokenKind::LBrace) => {
                let block = self.parse_block()?;
                Ok(Expr {
                    span: block.span,
                    kind: ExprKind::Block(block),
                })
            }
            Some(TokenKind::Pipe) | Some(TokenKind::OrOr) => self.parse_lambda(),
            Some(TokenKind::LParen) => {
                let lp = self.next().unwrap();
                if self.at(TokenKind::RParen) {
                    let rp = self.next().unwrap();
                    return Ok(Expr {
                        span: join(lp.span, rp.span),
                        kind: ExprKind::Tuple(Vec::new()),
                    });
                }
                let mut items = vec![self.parse_expr_allow_struct()?];
                while self.at(TokenKind::Comma) {
                    self.next();
                    if self.at(TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expr_allow_struct()?);
                }
                let rp = self.expect(TokenKind::RParen)?;
                let span = join(lp.span, rp.span);
                if items.len() == 1 {
                    // A single parenthesized element unwraps.
                    let mut only = items.pop().unwrap();
                    only.span = span;
                    Ok(only)
                } else {
                    Ok(Expr {
                        span,
                        kind: ExprKind::Tuple(items),
                    })
                }
            }
            Some(TokenKind::LBracket) => {
                let lb = self.next().unwrap();
                let mut items = Vec::new();
                while !self.at(TokenKind::RBracket) {
                    items.push(self.parse_expr_allow_struct()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rb = self.expect(TokenKind::RBracket)?;
                Ok(Expr {
                    span: join(lb.span, rb.span),
                    kind: ExprKind::Array(items),
                })
            }
            Some(TokenKind::Ident(_)) => {
                let name = self.expect_ident()?;

                if self.at(TokenKind::ColonColon) {
                    self.next();
                    let item = self.expect_ident()?;
                    let span = join(name.span, item.span);
                    return Ok(Expr {
                        span,
                        kind: ExprKind::Path { base: name, item },
                    });
                }

                if self.at(TokenKind::LBrace) && !self.no_struct_lit {
                    return self.parse_struct_lit(name);
                }

                let span = name.span;
                Ok(Expr {
                    span,
                    kind: ExprKind::Ident(name.node),
                })
            }
            _ => Err(self.err_here("expected an expression")),
        }
    }

    fn parse_struct_lit(&mut self, name: Ident) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        let mut spread = None;

        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::DotDot) {
                self.next();
                spread = Some(Box::new(self.parse_expr()?));
                if self.at(TokenKind::Comma) {
                    self.next();
                }
                break;
            }
            let fname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((fname, value));
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        let rb = self.expect(TokenKind::RBrace)?;

        Ok(Expr {
            span: join(name.span, rb.span),
            kind: ExprKind::StructLit {
                name,
                fields,
                spread,
            },
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let (start, params) = if self.at(TokenKind::OrOr) {
            // `||` opens a parameterless lambda.
            let tok = self.next().unwrap();
            (tok.span, Vec::new())
        } else {
            let open = self.expect(TokenKind::Pipe)?;
            let mut params = Vec::new();
            while !self.at(TokenKind::Pipe) {
                let pname = self.expect_ident()?;
                let ty = if self.at(TokenKind::Colon) {
                    self.next();
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let span = match &ty {
                    Some(t) => join(pname.span, t.span),
                    None => pname.span,
                };
                params.push(LambdaParam {
                    span,
                    name: pname,
                    ty,
                });
                if self.at(TokenKind::Comma) {
                    self.next();
                    continue;
                }
                break;
            }
            self.expect(TokenKind::Pipe)?;
            (open.span, params)
        };

        let ret = if self.at(TokenKind::Arrow) {
            self.next();
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_expr()?;
        let span = join(start, body.span);
        Ok(Expr {
            span,
            kind: ExprKind::Lambda {
                params,
                ret,
                body: Box::new(body),
            },
        })
    }

    fn parse_quantifier(&mut self, is_forall: bool) -> Result<Expr, ParseError> {
        let kw = if is_forall {
            self.expect(TokenKind::KwForall)?
        } else {
            self.expect(TokenKind::KwExists)?
        };

        let mut binders = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let collection = if self.at(TokenKind::KwIn) {
                self.next();
                Some(self.parse_or_expr()?)
            } else {
                None
            };
            let span = match &collection {
                Some(c) => join(name.span, c.span),
                None => name.span,
            };
            binders.push(QuantBinder {
                span,
                name,
                collection,
            });
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }

        self.expect(TokenKind::Colon)?;
        let body = self.parse_expr()?;
        let span = join(kw.span, body.span);
        Ok(Expr {
            span,
            kind: if is_forall {
                ExprKind::Forall {
                    binders,
                    body: Box::new(body),
                }
            } else {
                ExprKind::Exists {
                    binders,
                    body: Box::new(body),
                }
            },
        })
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        let mut ty = match self.peek_kind().cloned() {
            Some(TokenKind::Amp) => {
                let amp = self.next().unwrap();
                let mutable = if self.at(TokenKind::KwMut) {
                    self.next();
                    true
                } else {
                    false
                };
                let inner = self.parse_type()?;
                let span = join(amp.span, inner.span);
                TypeExpr {
                    span,
                    kind: TypeExprKind::Reference {
                        inner: Box::new(inner),
                        mutable,
                    },
                }
            }
            Some(TokenKind::LBracket) => {
                let lb = self.next().unwrap();
                let elem = self.parse_type()?;
                let size = if self.at(TokenKind::Semi) {
                    self.next();
                    let tok = self.expect_any()?;
                    match tok.kind {
                        TokenKind::Int(n) if n >= 0 => Some(n as u64),
                        _ => {
                            return Err(ParseError {
                                message: "array size must be a non-negative integer literal"
                                    .to_string(),
                                span: tok.span,
                            });
                        }
                    }
                } else {
                    None
                };
                let rb = self.expect(TokenKind::RBracket)?;
                TypeExpr {
                    span: join(lb.span, rb.span),
                    kind: TypeExprKind::Array {
                        elem: Box::new(elem),
                        size,
                    },
                }
            }
            Some(TokenKind::LParen) => {
                let lp = self.next().unwrap();
                let mut items = Vec::new();
                while !self.at(TokenKind::RParen) {
                    items.push(self.parse_type()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rp = self.expect(TokenKind::RParen)?;
                let span = join(lp.span, rp.span);
                if items.len() == 1 {
                    let mut only = items.pop().unwrap();
                    only.span = span;
                    only
                } else {
                    TypeExpr {
                        span,
                        kind: TypeExprKind::Tuple(items),
                    }
                }
            }
            Some(TokenKind::KwFn) => {
                let kw = self.next().unwrap();
                self.expect(TokenKind::LParen)?;
                let mut params = Vec::new();
                while !self.at(TokenKind::RParen) {
                    params.push(self.parse_type()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                let rp = self.expect(TokenKind::RParen)?;
                let mut end = rp.span;
                let ret = if self.at(TokenKind::Arrow) {
                    self.next();
                    let t = self.parse_type()?;
                    end = t.span;
                    t
                } else {
                    TypeExpr {
                        span: rp.span,
                        kind: TypeExprKind::Named {
                            name: Spanned::new(rp.span, "Void".to_string()),
                            args: Vec::new(),
                        },
                    }
                };
                let mut effects = Vec::new();
                if self.at(TokenKind::KwEffect) {
                    self.next();
                    self.expect(TokenKind::LBracket)?;
                    while !self.at(TokenKind::RBracket) {
                        effects.push(self.expect_ident()?);
                        if self.at(TokenKind::Comma) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                    end = self.expect(TokenKind::RBracket)?.span;
                }
                TypeExpr {
                    span: join(kw.span, end),
                    kind: TypeExprKind::Function {
                        params,
                        ret: Box::new(ret),
                        effects,
                    },
                }
            }
            Some(TokenKind::KwSelfType) => {
                let tok = self.next().unwrap();
                TypeExpr {
                    span: tok.span,
                    kind: TypeExprKind::Named {
                        name: Spanned::new(tok.span, "Self".to_string()),
                        args: Vec::new(),
                    },
                }
            }
            Some(TokenKind::Ident(_)) => {
                let name = self.expect_ident()?;
                let args = self.parse_generic_args()?;
                let span = match args.last() {
                    Some(last) => join(name.span, last.span),
                    None => name.span,
                };
                TypeExpr {
                    span,
                    kind: TypeExprKind::Named { name, args },
                }
            }
            _ => return Err(self.err_here("expected a type")),
        };

        while self.at(TokenKind::Question) {
            let tok = self.next().unwrap();
            let span = join(ty.span, tok.span);
            ty = TypeExpr {
                span,
                kind: TypeExprKind::Optional(Box::new(ty)),
            };
        }

        Ok(ty)
    }

    fn parse_generic_args(&mut self) -> Result<Vec<TypeExpr>, ParseError> {
        let mut args = Vec::new();
        if !self.at(TokenKind::Lt) {
            return Ok(args);
        }
        self.next();
        loop {
            args.push(self.parse_type()?);
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        self.close_generic()?;
        Ok(args)
    }

    /// Consume a `>` closing a generic list, splitting `>>` into two closers.
    fn close_generic(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Gt) => {
                self.next();
                Ok(())
            }
            Some(TokenKind::Shr) => {
                let tok = &mut self.tokens[self.idx];
                let start = tok.span.offset();
                tok.kind = TokenKind::Gt;
                tok.span = span_between(start + 1, start + 2);
                Ok(())
            }
            _ => Err(self.err_here("expected '>'")),
        }
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn err_here(&self, message: &str) -> ParseError {
        let (found, span) = match self.tokens.get(self.idx) {
            Some(tok) => (tok.kind.describe(), tok.span),
            None => ("end of input", span_between(0, 0)),
        };
        ParseError {
            message: format!("{message}, found {found}"),
            span,
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(Ident {
                span: tok.span,
                node: name,
            }),
            other => Err(ParseError {
                message: format!("expected identifier, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.expect_any()?;
        if mem::discriminant(&tok.kind) == mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError {
                message: format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.kind.describe()
                ),
                span: tok.span,
            })
        }
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        match self.next() {
            Some(tok) if tok.kind != TokenKind::Eof => Ok(tok),
            Some(tok) => Err(ParseError {
                message: "unexpected end of input".to_string(),
                span: tok.span,
            }),
            None => Err(ParseError {
                message: "unexpected end of input".to_string(),
                span: span_between(0, 0),
            }),
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx)?.clone();
        if tok.kind != TokenKind::Eof {
            self.idx += 1;
        }
        Some(tok)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }
}

enum StmtOrTail {
    Stmt(Stmt),
    Tail(Expr),
}

fn if_stmt_to_expr(s: IfStmt) -> Expr {
    let else_block = s.else_branch.map(|eb| match eb {
        ElseBranch::Block(b) => b,
        ElseBranch::If(nested) => {
            let span = nested.span;
            let inner = if_stmt_to_expr(*nested);
            Block {
                span,
                stmts: Vec::new(),
                tail: Some(Box::new(inner)),
            }
        }
    });
    Expr {
        span: s.span,
        kind: ExprKind::If {
            cond: Box::new(s.cond),
            then_block: s.then_block,
            else_block,
        },
    }
}

fn bin(left: Expr, op: BinOp, right: Expr) -> Expr {
    let span = join(left.span, right.span);
    Expr {
        span,
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn starts_decl(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KwFn
            | TokenKind::KwLet
            | TokenKind::KwType
            | TokenKind::KwStruct
            | TokenKind::KwEnum
            | TokenKind::KwTrait
            | TokenKind::KwImpl
            | TokenKind::KwContract
            | TokenKind::KwIntent
            | TokenKind::KwEffect
            | TokenKind::KwCapability
            | TokenKind::KwImport
            | TokenKind::KwExport
            | TokenKind::KwPure
            | TokenKind::KwExtern
    )
}

fn starts_stmt(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KwIf
            | TokenKind::KwWhile
            | TokenKind::KwFor
            | TokenKind::KwMatch
            | TokenKind::KwReturn
    )
}
