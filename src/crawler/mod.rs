// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 广度优先前沿
pub mod frontier;

/// 爬取编排
pub mod orchestrator;

/// 每主机礼貌闸门
pub mod politeness;
