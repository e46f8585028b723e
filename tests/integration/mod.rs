// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod helpers;

mod archive_roundtrip_test;
mod change_workflow_test;
mod crawl_workflow_test;
