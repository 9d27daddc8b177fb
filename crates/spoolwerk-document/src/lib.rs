// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Document: opens source files for delivery and lays rendered
// pages out on paper.

pub mod layout;
pub mod source;

pub use layout::{PageGeometry, Rect};
pub use source::{DocumentKind, SourceDocument, text_pages};
