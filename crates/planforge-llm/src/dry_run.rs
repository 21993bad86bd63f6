//! Dry-run backend: a canned, well-formed response with zero network cost.
//!
//! The placeholder carries every section the validator expects, so a
//! `--dry-run` invocation exercises assembly, validation, extraction and
//! persistence end to end.

use planforge_utils::ReasoningError;

use crate::types::{ReasoningBackend, ReasoningRequest, ReasoningResult};

const PLACEHOLDER: &str = r#"### 1. Understanding

Dry-run placeholder. No reasoning call was made; this skeleton stands in
for a real model response so the rest of the pipeline can be exercised.

### 2. Concerns & Uncertainties

- Is the gathered context sufficient for a real run?

### 3. Analysis

Complexity: (S)

Placeholder analysis produced without contacting the reasoning service.

### 4. Work Plan

- [ ] **Step 1:** Review the assembled context artifact
  - **Layer:** [GEN]
  - **Files:** outputs
  - **Acceptance:** Context artifact exists and covers the work item
- [ ] **Step 2:** Re-run without --dry-run to generate the real plan
  - **Layer:** [GEN]
  - **Files:** outputs
  - **Acceptance:** A reasoning response is persisted
  - **Depends on:** Step 1

### 5. Definition of Ready

- [x] Context assembled from tracker, wiki and code host
- [ ] **BLOCKING**: Real reasoning run completed
"#;

/// Backend used when `--dry-run` is set.
pub struct DryRunBackend;

#[async_trait::async_trait]
impl ReasoningBackend for DryRunBackend {
    async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResult, ReasoningError> {
        Ok(
            ReasoningResult::new(PLACEHOLDER, "dry-run")
                .with_tokens(Some(request.user.len() as u64 / 4), Some(0))
                .with_finish_reason("stop"),
        )
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
