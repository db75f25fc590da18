//! Call-site replacement: redirects matching `call`/`callvirt` instructions to wrapper methods.
//!
//! A replaced call site pushes two extra arguments in front of the call, the original opcode
//! and the original method token, and then calls the wrapper instead of the target:
//!
//! ```text
//! before                       after
//! ldarg.1                      ldarg.1
//! ldarg.2                      ldarg.2
//! call Db::Query(int32,int32)  ldc.i4.s 0x28
//!                              ldc.i4 0x0A000002
//!                              call Wrappers::Query(int32,int32,int32,int32)
//! ```

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    assembly::{opcodes::CALL, ILRewriter, InstructionCursor, Operand},
    cache::ModuleRecord,
    integration::MethodReplacement,
    metadata::{emitter::define_method_spec, resolver::TokenResolver},
    Result,
};

/// Shortest wrapper signature that can describe the two trailing opcode and token parameters.
pub const MIN_WRAPPER_SIGNATURE_LEN: usize = 5;

/// Number of parameters a wrapper declares beyond the target's.
const WRAPPER_EXTRA_PARAMETERS: i64 = 2;

/// Stack slots needed by the two pushed constants.
const REPLACEMENT_STACK_DELTA: usize = 2;

/// Rewrite the call sites in `rewriter` matched by `replacements`.
///
/// Rules are tried in order; every call instruction present before the first rule ran is
/// checked against every rule. Returns the number of replaced call sites. If anything was
/// replaced the method's max stack is raised once.
///
/// # Errors
/// Returns an error only if the rewriter rejects an edit. Rules that cannot apply are skipped.
#[allow(clippy::cast_possible_wrap)]
pub fn replace_call_sites(
    rewriter: &mut ILRewriter,
    record: &ModuleRecord,
    replacements: &[Arc<MethodReplacement>],
) -> Result<usize> {
    let resolver = TokenResolver::new(record.metadata.import.as_ref());
    let call_sites = rewriter.ids();
    let mut replaced = 0;

    for replacement in replacements {
        let wrapper = &replacement.wrapper;
        let target_rule = &replacement.target;

        let Some(wrapper_ref) = record.wrapper_member_ref(&wrapper.cache_key()) else {
            warn!(
                "No wrapper reference for {}.{} in {}",
                wrapper.type_name, wrapper.method_name, record.assembly_name
            );
            continue;
        };

        if wrapper.signature.len() < MIN_WRAPPER_SIGNATURE_LEN {
            debug!(
                "Skipping {}.{}: wrapper signature too short ({} bytes)",
                target_rule.type_name,
                target_rule.method_name,
                wrapper.signature.len()
            );
            continue;
        }

        for &id in &call_sites {
            let Some(instruction) = rewriter.instruction(id) else {
                continue;
            };
            if !instruction.is_call() {
                continue;
            }
            let Some(target_token) = instruction.operand.token() else {
                continue;
            };
            let original_opcode = instruction.opcode;

            let target = resolver.function_info(target_token);
            if !target.is_valid() {
                continue;
            }
            if target.type_info.name != target_rule.type_name
                || target.name != target_rule.method_name
            {
                continue;
            }

            let expected_arguments = i64::from(wrapper.signature.argument_count())
                - WRAPPER_EXTRA_PARAMETERS
                - i64::from(target.signature.is_instance_method());
            if expected_arguments != i64::from(target.signature.argument_count()) {
                debug!(
                    "Skipping {}.{}: argument counts don't match (expected {}, actual {})",
                    target.type_info.name,
                    target.name,
                    expected_arguments,
                    target.signature.argument_count()
                );
                continue;
            }

            if target.is_generic
                && target.signature.type_argument_count() != wrapper.signature.type_argument_count()
            {
                debug!(
                    "Skipping {}.{}: generic arity {} does not match the wrapper's {}",
                    target.type_info.name,
                    target.name,
                    target.signature.type_argument_count(),
                    wrapper.signature.type_argument_count()
                );
                continue;
            }

            let Some(actual) = resolver.signature_types(&target) else {
                debug!(
                    "Skipping {}.{}: signature types could not be parsed",
                    target.type_info.name, target.name
                );
                continue;
            };
            if !target_rule.matches_types(&actual) {
                debug!(
                    "Skipping {}.{}: signature types {:?} don't match {:?}",
                    target.type_info.name, target.name, actual, target_rule.signature_types
                );
                continue;
            }

            let (call_token, original_token) = if target.is_generic {
                match define_method_spec(
                    record.metadata.emit.as_ref(),
                    wrapper_ref,
                    target.method_spec_signature.data(),
                ) {
                    Ok(spec) => (spec, target.method_def_id),
                    Err(error) => {
                        warn!(
                            "Could not instantiate wrapper {}.{}: {}",
                            wrapper.type_name, wrapper.method_name, error
                        );
                        continue;
                    }
                }
            } else {
                (wrapper_ref, target_token)
            };

            let mut cursor = InstructionCursor::new(rewriter, id);
            cursor.load_int32(i32::from(original_opcode))?;
            cursor.load_int32(original_token.value() as i32)?;
            rewriter.set_instruction(id, CALL, Operand::Token(call_token))?;
            replaced += 1;

            info!(
                "Replaced call to {}.{} with {}.{} in {}",
                target.type_info.name,
                target.name,
                wrapper.type_name,
                wrapper.method_name,
                record.assembly_name
            );
        }
    }

    if replaced > 0 {
        rewriter.raise_max_stack(REPLACEMENT_STACK_DELTA)?;
    }
    Ok(replaced)
}
