// Copyright 2025-2026 CEMAXECUTER LLC

pub mod control;
pub mod udp;
