/*
 * Scheduling Policies
 *
 * The two disciplines the kernel supports, selected at boot:
 *
 * - priority: strict priority with donation-aware ordering
 * - mlfq: multi-level feedback queue with the load-average formula
 */

pub(crate) mod mlfq;
pub(crate) mod priority;

pub(crate) use mlfq::MlfqPolicy;
pub(crate) use priority::PriorityPolicy;
