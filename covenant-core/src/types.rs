#![forbid(unsafe_code)]

use std::collections::HashMap;

/// Checker-side type representation; distinct from the syntactic `TypeExpr`.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    /// Silent sentinel: adopted by failed sub-expressions so one error does
    /// not cascade.
    Unknown,
    /// Carrier sentinel for internal failures.
    Error(String),

    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt,
    Float32,
    Float64,
    Bool,
    Char,
    String,
    Void,
    Never,

    /// Nominal reference to a struct/enum/trait/effect/capability definition.
    Named(std::string::String),
    /// Generic application, e.g. `Box<Int>`.
    Applied {
        name: std::string::String,
        args: Vec<Type>,
    },

    Array {
        elem: Box<Type>,
        size: Option<u64>,
    },
    Tuple(Vec<Type>),
    Function(Box<FunctionType>),
    Reference {
        inner: Box<Type>,
        mutable: bool,
    },
    Optional(Box<Type>),
    Result {
        ok: Box<Type>,
        err: Box<Type>,
    },
    /// Bound generic parameter.
    Var {
        name: std::string::String,
        bounds: Vec<std::string::String>,
        id: u32,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamType {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionType {
    pub params: Vec<ParamType>,
    pub ret: Type,
    pub effects: Vec<String>,
    pub capabilities: Vec<String>,
    pub contracts: Vec<String>,
    pub is_pure: bool,
}

/// Struct definition: field order is declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct StructDef {
    pub generics: Vec<String>,
    pub fields: Vec<(String, Type)>,
    /// Serialized invariant clauses.
    pub invariants: Vec<String>,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDef {
    pub generics: Vec<String>,
    /// Variant order is declaration order; an empty field list is a unit
    /// variant.
    pub variants: Vec<(String, Vec<Type>)>,
}

impl EnumDef {
    pub fn variant(&self, name: &str) -> Option<&[Type]> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f.as_slice())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraitDef {
    pub generics: Vec<String>,
    pub supers: Vec<String>,
    pub methods: Vec<(String, FunctionType)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EffectDef {
    pub generics: Vec<String>,
    pub methods: Vec<(String, FunctionType)>,
}

impl EffectDef {
    pub fn method(&self, name: &str) -> Option<&FunctionType> {
        self.methods.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityDef {
    pub permissions: Vec<(String, Type)>,
}

impl CapabilityDef {
    pub fn permission(&self, name: &str) -> Option<&Type> {
        self.permissions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }
}

/// Contract clauses are carried as serialized expression strings; they are
/// never proved statically, only re-parsed for display and instrumentation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContractDef {
    pub requires: Vec<String>,
    pub ensures: Vec<String>,
    pub invariants: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntentDef {
    pub ensures: Vec<String>,
}

impl Type {
    pub fn display(&self) -> String {
        match self {
            Type::Unknown => "<unknown>".to_string(),
            Type::Error(msg) => format!("<error: {msg}>"),
            Type::Int => "Int".to_string(),
            Type::Int8 => "Int8".to_string(),
            Type::Int16 => "Int16".to_string(),
            Type::Int32 => "Int32".to_string(),
            Type::Int64 => "Int64".to_string(),
            Type::UInt => "UInt".to_string(),
            Type::Float32 => "Float32".to_string(),
            Type::Float64 => "Float64".to_string(),
            Type::Bool => "Bool".to_string(),
            Type::Char => "Char".to_string(),
            Type::String => "String".to_string(),
            Type::Void => "Void".to_string(),
            Type::Never => "Never".to_string(),
            Type::Named(n) => n.clone(),
            Type::Applied { name, args } => {
                let args_s = args
                    .iter()
                    .map(|t| t.display())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{name}<{args_s}>")
            }
            Type::Array { elem, size } => match size {
                Some(n) => format!("[{}; {n}]", elem.display()),
                None => format!("[{}]", elem.display()),
            },
            Type::Tuple(items) => {
                let items_s = items
                    .iter()
                    .map(|t| t.display())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({items_s})")
            }
            Type::Function(f) => {
                let params_s = f
                    .params
                    .iter()
                    .map(|p| p.ty.display())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("fn({params_s}) -> {}", f.ret.display())
            }
            Type::Reference { inner, mutable } => {
                if *mutable {
                    format!("&mut {}", inner.display())
                } else {
                    format!("&{}", inner.display())
                }
            }
            Type::Optional(inner) => format!("{}?", inner.display()),
            Type::Result { ok, err } => {
                format!("Result<{}, {}>", ok.display(), err.display())
            }
            Type::Var { name, .. } => name.clone(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }
}

pub fn is_integer(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Int | Type::Int8 | Type::Int16 | Type::Int32 | Type::Int64 | Type::UInt
    )
}

pub fn is_float(ty: &Type) -> bool {
    matches!(ty, Type::Float32 | Type::Float64)
}

pub fn is_numeric(ty: &Type) -> bool {
    is_integer(ty) || is_float(ty) || ty.is_unknown()
}

/// Bit width for widening. `Int` and `UInt` count as 64 bits.
fn int_width(ty: &Type) -> u32 {
    match ty {
        Type::Int8 => 8,
        Type::Int16 => 16,
        Type::Int32 => 32,
        Type::Int | Type::Int64 | Type::UInt => 64,
        _ => 0,
    }
}

fn float_width(ty: &Type) -> u32 {
    match ty {
        Type::Float32 => 32,
        Type::Float64 => 64,
        _ => 0,
    }
}

/// Result type of mixed-operand arithmetic: floats absorb integers, and
/// within a kind the larger width wins. Mixed 64-bit integer kinds widen to
/// `Int64`.
pub fn wider(a: &Type, b: &Type) -> Type {
    if a.is_unknown() || b.is_unknown() {
        return Type::Unknown;
    }
    if a == b {
        return a.clone();
    }
    match (is_float(a), is_float(b)) {
        (true, true) => {
            if float_width(a) >= float_width(b) {
                a.clone()
            } else {
                b.clone()
            }
        }
        (true, false) => a.clone(),
        (false, true) => b.clone(),
        (false, false) => {
            let (wa, wb) = (int_width(a), int_width(b));
            if wa > wb {
                a.clone()
            } else if wb > wa {
                b.clone()
            } else {
                Type::Int64
            }
        }
    }
}

/// Directed assignability; deliberately not symmetric.
pub fn assignable(from: &Type, to: &Type) -> bool {
    use Type::*;
    match (from, to) {
        (Never, _) => true,
        (Unknown, _) | (_, Unknown) => true,
        // The error sentinel already produced a diagnostic; keep it silent.
        (Error(_), _) | (_, Error(_)) => true,
        (Var { .. }, _) | (_, Var { .. }) => true,
        (a, b) if a == b => true,

        (Optional(fi), Optional(ti)) => assignable(fi, ti),
        // Plain value into optional slot.
        (f, Optional(ti)) => assignable(f, ti),

        (
            Reference {
                inner: fi,
                mutable: fm,
            },
            Reference {
                inner: ti,
                mutable: tm,
            },
        ) => assignable(fi, ti) && (*fm || !*tm),

        (
            Array {
                elem: fe,
                size: fs,
            },
            Array {
                elem: te,
                size: ts,
            },
        ) => assignable(fe, te) && (ts.is_none() || fs == ts),

        (Tuple(fs), Tuple(ts)) => {
            fs.len() == ts.len() && fs.iter().zip(ts).all(|(f, t)| assignable(f, t))
        }

        (Result { ok: fo, err: fe }, Result { ok: to, err: te }) => {
            assignable(fo, to) && assignable(fe, te)
        }

        (
            Applied {
                name: fname,
                args: fargs,
            },
            Applied {
                name: tname,
                args: targs,
            },
        ) => {
            fname == tname
                && fargs.len() == targs.len()
                && fargs.iter().zip(targs).all(|(f, t)| assignable(f, t))
        }

        (f, t) if is_integer(f) && is_integer(t) => int_width(f) <= int_width(t),
        (f, t) if is_float(f) && is_float(t) => float_width(f) <= float_width(t),
        (f, t) if is_integer(f) && is_float(t) => true,

        _ => false,
    }
}

/// Replace bound type variables by name.
pub fn substitute(ty: &Type, map: &HashMap<String, Type>) -> Type {
    match ty {
        Type::Var { name, .. } => map.get(name).cloned().unwrap_or_else(|| ty.clone()),
        Type::Applied { name, args } => Type::Applied {
            name: name.clone(),
            args: args.iter().map(|a| substitute(a, map)).collect(),
        },
        Type::Array { elem, size } => Type::Array {
            elem: Box::new(substitute(elem, map)),
            size: *size,
        },
        Type::Tuple(items) => Type::Tuple(items.iter().map(|t| substitute(t, map)).collect()),
        Type::Function(f) => Type::Function(Box::new(FunctionType {
            params: f
                .params
                .iter()
                .map(|p| ParamType {
                    name: p.name.clone(),
                    ty: substitute(&p.ty, map),
                    mutable: p.mutable,
                })
                .collect(),
            ret: substitute(&f.ret, map),
            effects: f.effects.clone(),
            capabilities: f.capabilities.clone(),
            contracts: f.contracts.clone(),
            is_pure: f.is_pure,
        })),
        Type::Reference { inner, mutable } => Type::Reference {
            inner: Box::new(substitute(inner, map)),
            mutable: *mutable,
        },
        Type::Optional(inner) => Type::Optional(Box::new(substitute(inner, map))),
        Type::Result { ok, err } => Type::Result {
            ok: Box::new(substitute(ok, map)),
            err: Box::new(substitute(err, map)),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignability_is_directed() {
        assert!(assignable(&Type::Never, &Type::String));
        assert!(!assignable(&Type::String, &Type::Never));

        assert!(assignable(&Type::Int, &Type::Optional(Box::new(Type::Int))));
        assert!(!assignable(&Type::Optional(Box::new(Type::Int)), &Type::Int));

        let imm = Type::Reference {
            inner: Box::new(Type::Int),
            mutable: false,
        };
        let mutable = Type::Reference {
            inner: Box::new(Type::Int),
            mutable: true,
        };
        assert!(assignable(&mutable, &imm));
        assert!(!assignable(&imm, &mutable));
    }

    #[test]
    fn numeric_widening() {
        assert!(assignable(&Type::Int8, &Type::Int32));
        assert!(!assignable(&Type::Int32, &Type::Int8));
        assert!(assignable(&Type::Int, &Type::Float32));
        assert!(assignable(&Type::Float32, &Type::Float64));
        assert!(!assignable(&Type::Float64, &Type::Float32));
        // Int and UInt are both 64-bit for widening.
        assert!(assignable(&Type::UInt, &Type::Int64));
        assert!(assignable(&Type::Int, &Type::Int64));
    }

    #[test]
    fn wider_prefers_floats_and_larger_widths() {
        assert_eq!(wider(&Type::Int, &Type::Float32), Type::Float32);
        assert_eq!(wider(&Type::Float32, &Type::Float64), Type::Float64);
        assert_eq!(wider(&Type::Int8, &Type::Int32), Type::Int32);
        assert_eq!(wider(&Type::Int, &Type::UInt), Type::Int64);
        assert_eq!(wider(&Type::Int, &Type::Int), Type::Int);
    }
}
