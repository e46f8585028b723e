// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 归档容器模块
///
/// AVCR/1容器格式的写入、读取、校验与持久化存储
pub mod archive;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 爬取模块
///
/// 广度优先的站点捕获编排，带礼貌闸门
pub mod crawler;

/// 变化检测模块
///
/// 对比相邻快照的多维距离并分类
pub mod detector;

/// 领域模块
///
/// 核心业务实体与外部协作方端口
pub mod domain;

/// 引擎模块
///
/// 可插拔的抓取引擎（HTTP与渲染）
pub mod engines;

/// 索引模块
///
/// 快照索引的生成、合并与时间点查询
pub mod index;

/// 调度模块
///
/// 自适应频率的捕获调度
pub mod scheduler;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;
