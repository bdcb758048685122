//! Target Specification System
//!
//! This module provides the target specification for code generation: the
//! physical register pool handed to the allocator, the calling-convention
//! registers, the stack-frame geometry and the spill policy.
//!
//! The default target is 32-bit x86 with the four classic general-purpose
//! registers in the allocation pool, `%eax` as the return register and
//! 4-byte stack slots growing down from `%ebp - 4`.

use crate::compiler::error::{CompilerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical general-purpose register.
///
/// # Memory Optimization
/// Uses `#[repr(u8)]` so register sets and result tables stay one byte per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PhysicalRegister {
    Eax = 0,
    Ebx = 1,
    Ecx = 2,
    Edx = 3,
    Esi = 4,
    Edi = 5,
}

impl PhysicalRegister {
    /// Every register the emitter may touch, in encoding order.
    ///
    /// Scratch registers are drawn from this list, so a value may be
    /// staged through a register that is not part of the allocation pool.
    pub const ALL: [PhysicalRegister; 6] = [
        PhysicalRegister::Eax,
        PhysicalRegister::Ebx,
        PhysicalRegister::Ecx,
        PhysicalRegister::Edx,
        PhysicalRegister::Esi,
        PhysicalRegister::Edi,
    ];

    /// Bare register name without the AT&T `%` sigil.
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            PhysicalRegister::Eax => "eax",
            PhysicalRegister::Ebx => "ebx",
            PhysicalRegister::Ecx => "ecx",
            PhysicalRegister::Edx => "edx",
            PhysicalRegister::Esi => "esi",
            PhysicalRegister::Edi => "edi",
        }
    }
}

impl fmt::Display for PhysicalRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// What the emitter does with a value the allocator could not give a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpillPolicy {
    /// Home the value in a dedicated frame slot; store after the definition,
    /// read the slot at every use.
    Stack,
    /// Treat a spilled value reaching emission as a fatal error.
    Error,
}

/// Target specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    /// Allocation pool, in the order the allocator prefers registers
    pub registers: Vec<PhysicalRegister>,
    /// Register that carries a function's return value
    pub return_register: PhysicalRegister,
    /// Registers a function must preserve for its caller
    pub callee_saved: Vec<PhysicalRegister>,
    /// Frame offset of the first stack slot (relative to `%ebp`)
    pub first_stack_offset: i32,
    /// Width of one stack slot in bytes
    pub slot_size: u32,
    /// Handling of spilled values
    pub spill_policy: SpillPolicy,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            registers: vec![
                PhysicalRegister::Eax,
                PhysicalRegister::Ebx,
                PhysicalRegister::Ecx,
                PhysicalRegister::Edx,
            ],
            return_register: PhysicalRegister::Eax,
            callee_saved: vec![
                PhysicalRegister::Ebx,
                PhysicalRegister::Esi,
                PhysicalRegister::Edi,
            ],
            first_stack_offset: -4,
            slot_size: 4,
            spill_policy: SpillPolicy::Stack,
        }
    }
}

impl TargetSpec {
    /// Parse a target specification from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let spec: TargetSpec = serde_json::from_str(text).map_err(|e| {
            CompilerError::invalid_target(format!("malformed target description: {}", e))
        })?;
        validate_target(&spec)?;
        Ok(spec)
    }

    /// Same target with a different allocation pool.
    pub fn with_registers(mut self, registers: Vec<PhysicalRegister>) -> Self {
        self.registers = registers;
        self
    }

    /// Same target with a different spill policy.
    pub fn with_spill_policy(mut self, policy: SpillPolicy) -> Self {
        self.spill_policy = policy;
        self
    }
}

/// Validate target specification.
pub fn validate_target(target: &TargetSpec) -> Result<()> {
    if target.registers.is_empty() {
        return Err(CompilerError::invalid_target(
            "register pool is empty; at least one register is required",
        ));
    }

    for (idx, reg) in target.registers.iter().enumerate() {
        if target.registers[..idx].contains(reg) {
            return Err(CompilerError::invalid_target(format!(
                "register {} appears more than once in the pool",
                reg
            )));
        }
    }

    if target.first_stack_offset >= 0 {
        return Err(CompilerError::invalid_target(format!(
            "first stack offset must be negative, got {}",
            target.first_stack_offset
        )));
    }

    if target.slot_size == 0 {
        return Err(CompilerError::invalid_target("slot size must be non-zero"));
    }

    let step: i32 = i32::try_from(target.slot_size).map_err(|_| {
        CompilerError::invalid_target(format!(
            "slot size must be at most {}, got {}",
            i32::MAX,
            target.slot_size
        ))
    })?;

    if target.first_stack_offset.checked_sub(step).is_none() {
        return Err(CompilerError::invalid_target(format!(
            "first stack offset {} leaves no room for a {}-byte slot",
            target.first_stack_offset, target.slot_size
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target_is_valid() {
        assert!(validate_target(&TargetSpec::default()).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_registers() {
        let target = TargetSpec::default()
            .with_registers(vec![PhysicalRegister::Eax, PhysicalRegister::Eax]);
        assert!(validate_target(&target).is_err());
    }

    #[test]
    fn test_rejects_oversized_slot() {
        let mut target = TargetSpec::default();
        target.slot_size = i32::MAX as u32 + 1;
        assert!(matches!(
            validate_target(&target),
            Err(CompilerError::InvalidTarget { .. })
        ));
        target.slot_size = i32::MAX as u32;
        target.first_stack_offset = -1;
        assert!(validate_target(&target).is_ok());
    }

    #[test]
    fn test_rejects_offset_at_bottom_of_range() {
        let mut target = TargetSpec::default();
        target.first_stack_offset = i32::MIN;
        assert!(matches!(
            validate_target(&target),
            Err(CompilerError::InvalidTarget { .. })
        ));
        target.first_stack_offset = i32::MIN + 4;
        assert!(validate_target(&target).is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let target = TargetSpec::from_json(r#"{ "registers": ["ecx"], "spill_policy": "error" }"#)
            .expect("valid target");
        assert_eq!(target.registers, vec![PhysicalRegister::Ecx]);
        assert_eq!(target.spill_policy, SpillPolicy::Error);
        assert_eq!(target.return_register, PhysicalRegister::Eax);
        assert_eq!(target.first_stack_offset, -4);
    }
}
