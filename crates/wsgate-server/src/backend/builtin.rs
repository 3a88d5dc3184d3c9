//! Stock in-process services, selectable from config by name.

use super::service::{Arg, NamedService, ParamType};
use wsgate_core::GatewayError;

/// Names accepted for `kind = "service"` backends.
pub const SERVICES: &[&str] = &["echo", "math"];

pub fn service(name: &str) -> Option<NamedService> {
    match name {
        "echo" => Some(echo()),
        "math" => Some(math()),
        _ => None,
    }
}

/// `ping(int) -> int` and `say(text) -> text`, both returning their input.
pub fn echo() -> NamedService {
    NamedService::builder("echo")
        .operation("ping", &[ParamType::Int], ParamType::Int, |args| async move {
            Ok(Arg::Int(args.int(0)?))
        })
        .operation("say", &[ParamType::Text], ParamType::Text, |args| async move {
            Ok(Arg::Text(args.text(0)?.to_string()))
        })
        .build()
}

/// Arbitrary-precision `add`/`mul` over naturals and float `div`.
pub fn math() -> NamedService {
    NamedService::builder("math")
        .operation(
            "add",
            &[ParamType::Nat, ParamType::Nat],
            ParamType::Nat,
            |args| async move { Ok(Arg::Nat(args.nat(0)? + args.nat(1)?)) },
        )
        .operation(
            "mul",
            &[ParamType::Nat, ParamType::Nat],
            ParamType::Nat,
            |args| async move { Ok(Arg::Nat(args.nat(0)? * args.nat(1)?)) },
        )
        .operation(
            "div",
            &[ParamType::Float, ParamType::Float],
            ParamType::Float,
            |args| async move {
                let divisor = args.float(1)?;
                if divisor == 0.0 {
                    return Err(GatewayError::Invocation("division by zero".into()));
                }
                Ok(Arg::Float(args.float(0)? / divisor))
            },
        )
        .build()
}
