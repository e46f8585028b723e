// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 变化报告与分类
pub mod change;

/// 爬取作业
pub mod job;

/// 调度实体与状态机
pub mod schedule;

/// 快照与版本登记
pub mod snapshot;

/// 爬取目标
pub mod target;
